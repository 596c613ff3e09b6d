use crate::layers::error::{Error, Result};
use crate::layers::llm::ChatModel;
use crate::layers::tags::{element, elements};

/// Turns a short research question into a paragraph that is easier to judge
/// relevance against.
pub async fn expand_question(model: &dyn ChatModel, question: &str) -> Result<String> {
    let prompt = format!(
        "You are a helpful research assistant that gives advice on literature review.\n\
         Expand the research question given within <question></question> tags into a concise \
         one-paragraph description that helps in finding the most relevant papers.\n\
         Put your paragraph within <response></response> tags.\n\n\
         Here is the research question:\n<question>{question}</question>\n\nResponse:\n"
    );
    let response = model.respond(&prompt).await?;
    element(&response, "response")
        .map(str::to_string)
        .ok_or_else(|| Error::missing_tags("response", response.as_str()))
}

/// Asks for ADS search queries that cover a research question.
pub async fn suggest_queries(model: &dyn ChatModel, question: &str) -> Result<Vec<String>> {
    let prompt = format!(
        "You are a helpful research assistant that gives advice on literature review.\n\
         Suggest ADS search queries for the research question given within <question></question> tags.\n\
         Wrap each query suggestion in its own <query></query> tag.\n\n\
         Example:\n<query>cosmic microwave background lensing</query>\n<query>cmb polarization</query>\n\n\
         Here is the research question:\n<question>{question}</question>\n\nSuggestions:\n"
    );
    let response = model.respond(&prompt).await?;

    let mut queries: Vec<String> = Vec::new();
    for query in elements(&response, "query") {
        if !query.is_empty() && !queries.iter().any(|q| q == query) {
            queries.push(query.to_string());
        }
    }
    if queries.is_empty() {
        return Err(Error::missing_tags("query", response));
    }
    Ok(queries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::testing::ScriptedModel;

    #[tokio::test]
    async fn test_expand_question_extracts_response() {
        let model = ScriptedModel::new(["Here it is:\n<response>\nBirefringence rotates the\nCMB polarization plane.\n</response>"]);
        let expanded = expand_question(&model, "cosmic birefringence").await.unwrap();
        assert_eq!(expanded, "Birefringence rotates the\nCMB polarization plane.");
        assert!(model.prompts()[0].contains("<question>cosmic birefringence</question>"));
    }

    #[tokio::test]
    async fn test_expand_question_requires_tags() {
        let model = ScriptedModel::new(["Birefringence is interesting."]);
        assert!(matches!(
            expand_question(&model, "q").await,
            Err(Error::MissingTags { expected: "response", .. })
        ));
    }

    #[tokio::test]
    async fn test_suggest_queries_in_order_without_duplicates() {
        let model = ScriptedModel::new([
            "<query>cmb polarization</query>\n<query> cosmic birefringence </query>\n<query>cmb polarization</query><query></query>",
        ]);
        let queries = suggest_queries(&model, "q").await.unwrap();
        assert_eq!(queries, vec!["cmb polarization", "cosmic birefringence"]);
    }

    #[tokio::test]
    async fn test_suggest_queries_requires_at_least_one() {
        let model = ScriptedModel::new(["I'd search for polarization."]);
        assert!(suggest_queries(&model, "q").await.is_err());
    }

    #[tokio::test]
    async fn test_transport_errors_pass_through() {
        let model = ScriptedModel::new(Vec::<&str>::new());
        assert!(matches!(suggest_queries(&model, "q").await, Err(Error::EmptyResponse)));
    }
}
