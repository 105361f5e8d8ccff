//! Prompt text handed to the model as its system instruction.

use crate::config::RepoTarget;

const SQL_ANALYST_TEMPLATE: &str = include_str!("prompts/sql_analyst.md");

/// Fill the repository slots of the SQL analyst instruction.
pub fn sql_analyst_instruction(target: &RepoTarget) -> String {
    SQL_ANALYST_TEMPLATE
        .replace("{owner}", &target.owner)
        .replace("{repo}", &target.repo)
        .replace("{branch}", &target.branch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentSettings;

    #[test]
    fn default_render_keeps_placeholders_of_record() {
        let text = sql_analyst_instruction(&AgentSettings::default().github);
        assert!(text.contains(r#"`owner`: "YOUR_PROJECT_ORG_OR_OWNER_NAME""#));
        assert!(text.contains(r#"`repo`: "REPO_NAME""#));
        assert!(text.contains(r#"branch="master""#));
        assert!(!text.contains("{owner}"));
    }

    #[test]
    fn prose_outside_the_slots_is_verbatim() {
        let text = sql_analyst_instruction(&AgentSettings::default().github);
        assert!(text.starts_with(
            "You are an expert SQL Logic Analyst specializing in repository-based data discovery."
        ));
        assert!(text.contains("4. Logic Extraction**: Parse the SQL code"));
        assert!(text.contains("### few sql function definitions to know:"));
        assert!(text.contains("you will come accross some sql functions like below."));
        assert!(text.contains("1. **Reading Files**: When you find a file path using `search_code` \n"));
        assert!(text.ends_with("4. branch=\"master\" #branch name of your repo\n\n"));
    }

    #[test]
    fn renders_configured_repository() {
        let target = RepoTarget {
            owner: "acme-data".into(),
            repo: "warehouse-sql".into(),
            branch: "main".into(),
        };
        let text = sql_analyst_instruction(&target);
        assert!(text.contains(r#""acme-data""#));
        assert!(text.contains(r#""warehouse-sql""#));
        assert!(text.contains(r#""main""#));
        assert!(text.contains("search_code"));
        assert!(text.contains("get_file_contents"));
    }
}
