use crate::db::Article;
use crate::util::truncate_chars;

/// Bodies can run to 20k characters; the model only needs the lede.
const MAX_BODY_CHARS: usize = 4000;
/// Members included in a cluster prompt.
const MAX_CLUSTER_ARTICLES: usize = 5;
/// Body snippet per member in a cluster prompt.
const SNIPPET_CHARS: usize = 200;

pub fn article_summary(title: &str, content: &str) -> String {
    format!(
        "You are a news summarizer. Use only facts stated in the article; \
         no speculation. Write in Korean.\n\n\
         Summarize the following article in three short sentences.\n\n\
         [Title]\n{}\n\n[Body]\n{}",
        title,
        truncate_chars(content, MAX_BODY_CHARS)
    )
}

pub fn cluster_summary(members: &[Article]) -> String {
    let mut prompt = String::from(
        "You are a news desk editor. The articles below cover the same story. \
         Write in Korean.\n\
         First line: one clean headline for the whole story, at most 30 \
         characters, no quotes or embellishment.\n\
         Following lines: a three-line summary of the key facts.\n\n\
         [Articles]\n",
    );

    for article in members.iter().take(MAX_CLUSTER_ARTICLES) {
        prompt.push_str("- ");
        prompt.push_str(article.title.as_deref().unwrap_or("(untitled)"));
        prompt.push('\n');
        if let Some(content) = article.assessable_text() {
            prompt.push_str("  ");
            prompt.push_str(&truncate_chars(content, SNIPPET_CHARS));
            prompt.push_str("\n\n");
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_prompt_caps_members() {
        let members: Vec<Article> = (0..8)
            .map(|i| Article {
                id: i,
                title: Some(format!("기사 {}", i)),
                content: Some("본문".to_string()),
                ..Article::default()
            })
            .collect();
        let prompt = cluster_summary(&members);
        assert!(prompt.contains("기사 4"));
        assert!(!prompt.contains("기사 5"));
    }

    #[test]
    fn test_article_prompt_truncates_body() {
        let prompt = article_summary("제목", &"가".repeat(10_000));
        assert!(prompt.chars().count() < 5_000);
    }
}
