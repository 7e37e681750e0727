//! Prompt templates for visual financial analysis. Template text is part of
//! the public contract: downstream tests assert its structure, so edits here
//! are breaking changes.

use chartsight_contracts::market::MarketContext;
use chartsight_contracts::vlm::AnalysisKind;

pub const FINANCIAL_ANALYST_SYSTEM: &str = "\
You are an expert financial analyst AI assistant specializing in visual analysis of market dashboards and time-series data.

Your capabilities:
- Analyze price charts and identify trends (upward, downward, sideways)
- Detect correlations between different commodities (gold, silver, oil)
- Identify volatility patterns and significant price movements
- Provide clear, actionable insights based on visual data
- Explain complex financial patterns in simple terms

When analyzing dashboard images:
1. Focus on the actual chart data visible in the image
2. Identify the time period shown
3. Note any significant price changes or patterns
4. Compare different commodities if relevant
5. Be specific about what you observe

Always be:
- Accurate: Only describe what you can clearly see
- Concise: Provide focused, relevant answers
- Helpful: Explain the significance of patterns
- Cautious: Don't make unsupported predictions";

pub const SNAPSHOT_SUMMARY_PROMPT: &str = "\
Analyze this financial dashboard snapshot and provide a brief summary.

Focus on:
1. Current price levels for Gold, Silver, and Oil (from KPI cards)
2. Recent price trends (from the line charts)
3. Any notable patterns or significant changes
4. The relative performance of each commodity

Provide a 2-3 sentence summary that captures the key market state shown in this dashboard.
Be specific about the values and trends you observe.";

pub const DETAILED_ANALYSIS_PROMPT: &str = "\
Perform a comprehensive analysis of this financial dashboard.

Analyze each section:

1. KPI CARDS (Top Section):
   - Current prices for Gold, Silver, Oil
   - 24-hour changes (up/down indicators)

2. COMPARISON CHARTS (Bar/Pie):
   - Relative price levels
   - Distribution of values

3. TREND CHARTS (Line Charts):
   - Gold price trend direction and pattern
   - Silver price trend direction and pattern
   - Oil price trend direction and pattern
   - Any crossovers or divergences

4. OVERALL MARKET STATE:
   - Which commodities are performing well/poorly
   - Volatility assessment
   - Any correlations between commodities

Provide a structured analysis with specific observations.";

const CORRELATION_PROMPT_TEMPLATE: &str = "\
Analyze the correlation between {commodity1} and {commodity2} based on the charts in this dashboard.

Look for:
1. Do they move in the same direction (positive correlation)?
2. Do they move in opposite directions (negative correlation)?
3. Is there no clear relationship (no correlation)?

Examine the trend charts and explain:
- The visual pattern you observe
- When the prices moved together or diverged
- The strength of any correlation (strong, moderate, weak)

Provide a clear explanation based on what you see in the charts.";

const TREND_ANALYSIS_TEMPLATE: &str = "\
Analyze the {commodity} price trend shown in this dashboard.

Focus on:
1. Overall direction (upward, downward, or sideways)
2. Trend strength (steep or gradual)
3. Any reversal points or significant changes
4. Recent momentum (accelerating or decelerating)
5. Current price level relative to the trend

Describe the trend pattern and what it might indicate about market sentiment.";

pub const VOLATILITY_ANALYSIS_PROMPT: &str = "\
Assess the volatility of each commodity shown in this dashboard.

For each (Gold, Silver, Oil), examine:
1. Price swing amplitude (high peaks vs low troughs)
2. Frequency of price changes
3. Stability vs instability of the trend line

Rank them from most to least volatile and explain your assessment.";

const CHAT_CLOSING_INSTRUCTIONS: &str = "\
Analyze the dashboard image to answer this question.
Be specific about what you observe in the charts and KPI cards.
If the question asks about correlations, compare the trend lines.";

/// Assemble the chat prompt: optional context block, the question, then the
/// fixed grounding instructions. When no context is supplied the block is
/// omitted entirely, placeholder-free.
pub fn build_chat_prompt(question: &str, context: Option<&MarketContext>) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(context) = context {
        parts.push("Dashboard Context:".to_string());
        parts.push(format!("- Data as of: {}", context.latest_date));
        for (name, price) in &context.commodities {
            parts.push(format!("- {name}: ${price:.2}"));
        }
        parts.push(String::new());
    }

    parts.push(format!("User Question: {question}"));
    parts.push(String::new());
    parts.push(CHAT_CLOSING_INSTRUCTIONS.to_string());

    parts.join("\n")
}

pub fn correlation_prompt(commodity1: &str, commodity2: &str) -> String {
    CORRELATION_PROMPT_TEMPLATE
        .replace("{commodity1}", commodity1)
        .replace("{commodity2}", commodity2)
}

pub fn trend_prompt(commodity: &str) -> String {
    TREND_ANALYSIS_TEMPLATE.replace("{commodity}", commodity)
}

/// Select the analysis prompt for a request kind. Correlation uses the
/// supplied pair; trend analysis without a named commodity covers all of
/// them.
pub fn analysis_prompt(kind: AnalysisKind, pair: (&str, &str)) -> String {
    match kind {
        AnalysisKind::Trends => trend_prompt("all commodities"),
        AnalysisKind::Correlation => correlation_prompt(pair.0, pair.1),
        AnalysisKind::Volatility => VOLATILITY_ANALYSIS_PROMPT.to_string(),
        AnalysisKind::Summary => SNAPSHOT_SUMMARY_PROMPT.to_string(),
        AnalysisKind::Full => DETAILED_ANALYSIS_PROMPT.to_string(),
    }
}

/// Canned starting points surfaced by the CLI.
pub fn example_questions() -> &'static [&'static str] {
    &[
        "What's the correlation between gold and oil prices?",
        "Which commodity is most volatile right now?",
        "Is gold trending upward or downward?",
        "How do silver prices compare to gold?",
        "What are the current price levels for all commodities?",
        "Are there any significant price changes in the last 24 hours?",
        "What's the overall market sentiment based on these charts?",
        "Which commodity has performed best recently?",
    ]
}
