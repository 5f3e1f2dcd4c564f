//! Prompt construction for the generative ranking step.
//!
//! The context only ever contains the eligible retrieved candidates, so the
//! model has no knowledge of assessments outside that set.

use crate::semantic::Candidate;

/// Longest previous answer echoed back in a repair prompt.
const MAX_ECHOED_RESPONSE: usize = 4000;

/// Instructions fixing the role, the exact output schema and count.
pub fn system_instructions(target: usize, max_duration: Option<u32>) -> String {
    let mut out = String::new();
    out.push_str(
        "You are an assistant specialized in recommending talent assessments based on job descriptions and hiring queries.\n\
         Analyze the query and rank the candidate assessments supplied in the context.\n\n\
         Consider:\n\
         - required technical skills (programming languages, tools)\n\
         - job level (entry, mid, senior)\n\
         - desired soft skills or personality traits\n\
         - time constraints for assessment completion\n\
         - any specific assessment types mentioned\n\n",
    );
    out.push_str(&format!(
        "Return EXACTLY {target} recommendations, chosen only from the candidate assessments in the context.\n"
    ));
    out.push_str(
        "Respond with a single JSON object and nothing else, using this exact schema:\n\
         {\n  \"recommendations\": [\n    {\n\
         \x20     \"id\": <candidate id as integer>,\n\
         \x20     \"assessment_name\": \"<name exactly as given>\",\n\
         \x20     \"url\": \"<url exactly as given>\",\n\
         \x20     \"remote_testing\": \"Yes\" | \"No\",\n\
         \x20     \"adaptive_support\": \"Yes\" | \"No\",\n\
         \x20     \"duration\": <minutes as integer or null>,\n\
         \x20     \"test_type\": \"<test type>\",\n\
         \x20     \"relevance_score\": <number between 0 and 1>,\n\
         \x20     \"relevance_explanation\": \"<one sentence on why it matches the query>\"\n\
         \x20   }\n  ]\n}\n\n",
    );
    out.push_str(
        "Rules:\n\
         - never invent assessments, names or urls that are not in the context\n\
         - sort recommendations by relevance_score in descending order\n\
         - every recommendation needs a non-empty relevance_explanation\n\
         - do not wrap the JSON in markdown or add any text outside it\n",
    );
    if let Some(limit) = max_duration {
        out.push_str(&format!(
            "- the query limits assessments to {limit} minutes; never recommend a longer one\n"
        ));
    }
    out
}

/// Render the candidate set followed by the query.
pub fn render_context(query: &str, candidates: &[Candidate]) -> String {
    let mut out = String::from("Candidate assessments:\n\n");
    for candidate in candidates {
        let doc = &candidate.document;
        let meta = &doc.metadata;
        let duration = meta
            .duration
            .map(|d| format!("{d} minutes"))
            .unwrap_or_else(|| "unknown".to_string());
        out.push_str(&format!(
            "Candidate ID: {}\nName: {}\nURL: {}\nRemote Testing: {} | Adaptive Support: {} | Duration: {} | Test Type: {}\nRetrieval Similarity: {:.4}\n{}\n---\n",
            doc.id,
            meta.name,
            meta.url,
            meta.remote_testing.as_str(),
            meta.adaptive_support.as_str(),
            duration,
            if meta.test_type.is_empty() { "unknown" } else { meta.test_type.as_str() },
            candidate.score,
            doc.content.trim()
        ));
    }
    out.push_str("\nQuery:\n");
    out.push_str(query.trim());
    out.push('\n');
    out
}

/// Context for a corrective re-prompt after an unparsable answer.
pub fn repair_context(context: &str, previous: &str, reason: &str) -> String {
    let echoed: String = previous.chars().take(MAX_ECHOED_RESPONSE).collect();
    format!(
        "{context}\nYour previous response could not be parsed: {reason}\n\
         Previous response:\n{echoed}\n\n\
         Return only the corrected JSON object following the required schema.\n"
    )
}
