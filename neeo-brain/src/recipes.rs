//! Recipe listing and lookup.

use std::collections::BTreeMap;

use brain_transport::HttpTransport;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::endpoints;
use crate::error::{BrainError, Result};

/// A recipe as listed by the brain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Recipe {
    pub uid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub urls: Option<RecipeUrls>,
}

/// Action URLs of a recipe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecipeUrls {
    pub set_power_on: Option<String>,
    pub set_power_off: Option<String>,
}

impl Recipe {
    /// URL switching the recipe on or off, if the brain provided one
    pub fn action_url(&self, on: bool) -> Option<&str> {
        let urls = self.urls.as_ref()?;
        let url = if on {
            urls.set_power_on.as_deref()
        } else {
            urls.set_power_off.as_deref()
        };
        url.filter(|u| !u.trim().is_empty())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecipeListing {
    List(Vec<Recipe>),
    Keyed(BTreeMap<String, Recipe>),
}

/// Decode a recipe listing.
///
/// The brain normally answers with an array; a JSON object keyed by recipe
/// key is accepted as well.
pub fn parse_recipes(body: &str) -> Result<Vec<Recipe>> {
    let listing: RecipeListing = serde_json::from_str(body)?;
    Ok(match listing {
        RecipeListing::List(recipes) => recipes,
        RecipeListing::Keyed(recipes) => recipes.into_values().collect(),
    })
}

/// First recipe whose uid equals `uid`, ignoring case
pub fn find_recipe<'a>(recipes: &'a [Recipe], uid: &str) -> Option<&'a Recipe> {
    recipes.iter().find(|r| r.uid.eq_ignore_ascii_case(uid))
}

/// GET the recipe listing from the brain
pub async fn fetch_recipes(transport: &dyn HttpTransport, brain_url: &str) -> Result<Vec<Recipe>> {
    let url = format!("{brain_url}{}", endpoints::RECIPES);
    debug!(%url, "fetching recipes");

    let response = transport.get(&url).await?;
    if !response.is_ok() {
        return Err(BrainError::Transport {
            status: response.status,
            body: response.body,
        });
    }

    parse_recipes(&response.body)
}

/// Resolve a recipe action URL against the brain URL
///
/// The brain hands out absolute URLs; relative ones are joined to the brain URL.
pub(crate) fn resolve_action_url(brain_url: &str, action: &str) -> String {
    if action.starts_with('/') {
        format!("{brain_url}{action}")
    } else {
        action.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    const LISTING: &str = r#"[
        {
            "uid": "6242-abc",
            "name": "Watch TV",
            "type": "launch",
            "urls": {
                "setPowerOn": "http://brain:3000/v1/api/recipes/6242/execute",
                "setPowerOff": "http://brain:3000/v1/api/recipes/6242/poweroff"
            }
        },
        { "uid": "7001", "name": "Radio", "type": "launch" },
        { "uid": "6242-ABC", "name": "Duplicate", "type": "launch", "urls": {} }
    ]"#;

    #[test]
    fn test_parse_array_listing() {
        let recipes = parse_recipes(LISTING).unwrap();
        assert_eq!(recipes.len(), 3);
        assert_eq!(recipes[0].name, "Watch TV");
        assert_eq!(recipes[0].kind, "launch");
        assert!(recipes[1].urls.is_none());
    }

    #[test]
    fn test_parse_keyed_listing() {
        let body = r#"{
            "a": { "uid": "1", "name": "One" },
            "b": { "uid": "2", "name": "Two" }
        }"#;
        let recipes = parse_recipes(body).unwrap();
        let uids: Vec<_> = recipes.iter().map(|r| r.uid.as_str()).collect();
        assert_eq!(uids, vec!["1", "2"]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_recipes("42"), Err(BrainError::Parse(_))));
    }

    #[rstest]
    #[case("6242-abc", Some("Watch TV"))]
    #[case("6242-ABC", Some("Watch TV"))]
    #[case("7001", Some("Radio"))]
    #[case("6242", None)]
    #[case("", None)]
    fn test_find_recipe(#[case] uid: &str, #[case] expected: Option<&str>) {
        let recipes = parse_recipes(LISTING).unwrap();
        assert_eq!(find_recipe(&recipes, uid).map(|r| r.name.as_str()), expected);
    }

    #[test]
    fn test_action_url() {
        let recipes = parse_recipes(LISTING).unwrap();
        assert_eq!(
            recipes[0].action_url(true),
            Some("http://brain:3000/v1/api/recipes/6242/execute")
        );
        assert_eq!(
            recipes[0].action_url(false),
            Some("http://brain:3000/v1/api/recipes/6242/poweroff")
        );
        assert_eq!(recipes[1].action_url(true), None);
        assert_eq!(recipes[2].action_url(false), None);
    }

    #[test]
    fn test_resolve_action_url() {
        assert_eq!(
            resolve_action_url("http://brain:3000", "/v1/api/recipes/1/execute"),
            "http://brain:3000/v1/api/recipes/1/execute"
        );
        assert_eq!(
            resolve_action_url("http://brain:3000", "http://other/x"),
            "http://other/x"
        );
    }

    proptest! {
        #[test]
        fn prop_first_case_insensitive_match_wins(
            uids in proptest::collection::vec("[a-zA-Z0-9]{1,6}", 1..12),
            pick in any::<prop::sample::Index>(),
        ) {
            let recipes: Vec<Recipe> = uids
                .iter()
                .enumerate()
                .map(|(i, uid)| Recipe { uid: uid.clone(), name: i.to_string(), ..Default::default() })
                .collect();

            let wanted = pick.get(&uids).to_uppercase();
            let found = find_recipe(&recipes, &wanted).expect("present uid must match");
            let first = uids.iter().position(|u| u.eq_ignore_ascii_case(&wanted)).unwrap();
            prop_assert_eq!(&found.name, &first.to_string());
        }
    }
}
