//! The fixed Research → Draft → Edit → Package stage chain.
//!
//! Text fields are templates over `{topic}`, `{tone}`, `{target_audience}`
//! and `{current_year}`, rendered per run by [`PromptVars`].

use postforge_shared::{PipelineRequest, StageId};
use postforge_tools::CapabilityKind;

/// One step of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub id: StageId,
    pub order: u8,
    pub role_label: &'static str,
    pub goal: &'static str,
    pub backstory: &'static str,
    pub instructions: &'static str,
    pub expected_output: &'static str,
    pub capabilities: Vec<CapabilityKind>,
    /// Stages whose artifacts are quoted into this stage's prompt, in order.
    pub depends_on: Vec<StageId>,
}

/// Values substituted into stage templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptVars<'a> {
    pub topic: &'a str,
    pub tone: &'a str,
    pub target_audience: &'a str,
    pub current_year: i32,
}

impl<'a> PromptVars<'a> {
    pub fn new(request: &'a PipelineRequest, current_year: i32) -> Self {
        Self {
            topic: request.topic(),
            tone: request.tone(),
            target_audience: request.target_audience(),
            current_year,
        }
    }

    /// Substitute every placeholder in `template`.
    pub fn render(&self, template: &str) -> String {
        template
            .replace("{topic}", self.topic)
            .replace("{tone}", self.tone)
            .replace("{target_audience}", self.target_audience)
            .replace("{current_year}", &self.current_year.to_string())
    }
}

/// Build the chain in execution order.
pub fn default_stages() -> Vec<Stage> {
    vec![
        Stage {
            id: StageId::Research,
            order: 0,
            role_label: "{topic} Trend Researcher",
            goal: "Identify trending and highly engaging developments in {topic} that would \
                   make for compelling blog content in {current_year}.",
            backstory: "You're a seasoned social media researcher with expertise in {topic}. \
                        You have an eye for spotting emerging trends and viral topics that \
                        resonate with audiences. You use search tools to find real-time \
                        trending information, recent news, and popular discussions.",
            instructions: RESEARCH_INSTRUCTIONS,
            expected_output: "A research report including:\n\
                              - 3-5 trending angles or developments related to the topic\n\
                              - Key questions people are asking\n\
                              - Recent news or viral content\n\
                              - Recommended blog post angle with rationale\n\
                              - Relevant statistics, quotes, or data points from search results",
            capabilities: vec![CapabilityKind::TrendSearch],
            depends_on: vec![],
        },
        Stage {
            id: StageId::Draft,
            order: 1,
            role_label: "{topic} Expert Content Creator",
            goal: "Write an insightful, well-structured, and engaging blog post about {topic} \
                   using a {tone} tone for {target_audience}.",
            backstory: "You are a seasoned blog writer who creates compelling content that \
                        educates and engages readers. You know how to structure articles for \
                        maximum readability and impact.",
            instructions: DRAFT_INSTRUCTIONS,
            expected_output: "A complete, well-structured blog post with headline, introduction, \
                              main content sections, and conclusion that incorporates trending \
                              information.",
            capabilities: vec![CapabilityKind::KnowledgeRetrieval],
            depends_on: vec![StageId::Research],
        },
        Stage {
            id: StageId::Edit,
            order: 2,
            role_label: "{topic} Content Editor",
            goal: "Review and refine the blog post for clarity, flow, grammar, and engagement \
                   while maintaining the intended tone.",
            backstory: "You are a grammar purist and content strategist who ensures every piece \
                        of content meets the highest editorial standards.",
            instructions: EDIT_INSTRUCTIONS,
            expected_output: "A polished, edited blog post with improved clarity, grammar, and \
                              engagement.",
            capabilities: vec![],
            depends_on: vec![StageId::Draft],
        },
        Stage {
            id: StageId::Package,
            order: 3,
            role_label: "{topic} SEO and Marketing Specialist",
            goal: "Create concise, compelling metadata and summaries that will help the blog \
                   post perform well on social media and search engines.",
            backstory: "You are an expert in digital marketing and SEO who knows how to craft \
                        titles, descriptions, and hashtags that drive engagement and \
                        discoverability.",
            instructions: PACKAGE_INSTRUCTIONS,
            expected_output: "A single JSON object with keys: title, meta_description, hashtags, \
                              summary, and full_content.",
            capabilities: vec![],
            depends_on: vec![StageId::Edit],
        },
    ]
}

const RESEARCH_INSTRUCTIONS: &str = "\
Research current trends and developments related to: {topic}

Use the search tool to find:
1. Recent news and developments about {topic}
2. Trending discussions and viral content related to {topic}
3. Popular questions people are asking about {topic}
4. Emerging subtopics or angles within {topic}

Search queries to try:
- \"{topic} trends {current_year}\"
- \"{topic} news latest\"
- \"what's new in {topic}\"

Analyze the results to identify:
- What's currently trending and why
- What angles would be most engaging for {target_audience}
- Recent developments that would make compelling blog content
- Questions and pain points your audience has

Focus on finding a specific, compelling angle that would make readers want to click and read.";

const DRAFT_INSTRUCTIONS: &str = "\
Using the research findings, write a full blog post about {topic}.
The tone should be {tone} and aimed at {target_audience}.

If the knowledge base tool is available, use it with simple, clear queries such as:
- \"blog writing examples for {target_audience}\"
- \"{topic} content style guides\"
- \"engaging {tone} writing samples\"

Structure the post with:
- Engaging headline that reflects current trends
- Compelling introduction that hooks the reader with trending information
- Well-organized main content with clear sections
- Recent developments and trending information from the research
- Practical insights or takeaways
- Strong conclusion

Make it timely, informative, engaging, and valuable to readers. Aim for 800-1200 words.";

const EDIT_INSTRUCTIONS: &str = "\
Review the provided blog post and improve it for:
- Grammar and spelling accuracy
- Clarity and readability
- Flow and structure
- Engagement and compelling language
- Consistency with the {tone} tone
- Appeal to {target_audience}
- Timeliness and relevance of trending information

Make specific improvements while maintaining the original message and structure.
Return the complete edited post.";

const PACKAGE_INSTRUCTIONS: &str = "\
From the final edited blog post, generate SEO-friendly metadata:
- A compelling, SEO-optimized title (under 60 characters)
- A meta description (under 160 characters) that highlights trending aspects
- 5-8 relevant hashtags including trending ones
- A brief summary (2-3 sentences)

Respond with a single valid JSON object and nothing else, using exactly these keys:
title, meta_description, hashtags (an array of strings), summary, full_content.
full_content must contain the complete edited blog post.";
