//! Field-name to element-name conventions
//!
//! Fields are declared in snake_case while documents use lowerCamelCase
//! element names. Identifier fields additionally follow the `objectId`
//! convention: `id` maps to `objectId`, `user_id` to `userObjectId`.

use regex::Regex;
use std::sync::OnceLock;

/// Cached regex for a trailing identifier segment (`id`, `_id`)
static ID_SUFFIX_REGEX: OnceLock<Regex> = OnceLock::new();

/// Cached regexes for splitting camelCase words
static ACRONYM_BOUNDARY_REGEX: OnceLock<Regex> = OnceLock::new();
static WORD_BOUNDARY_REGEX: OnceLock<Regex> = OnceLock::new();

fn id_suffix_regex() -> &'static Regex {
    ID_SUFFIX_REGEX
        .get_or_init(|| Regex::new(r"(^|_)id$").expect("Failed to compile id suffix regex"))
}

fn acronym_boundary_regex() -> &'static Regex {
    ACRONYM_BOUNDARY_REGEX.get_or_init(|| {
        Regex::new(r"([A-Z]+)([A-Z][a-z])").expect("Failed to compile acronym boundary regex")
    })
}

fn word_boundary_regex() -> &'static Regex {
    WORD_BOUNDARY_REGEX.get_or_init(|| {
        Regex::new(r"([a-z\d])([A-Z])").expect("Failed to compile word boundary regex")
    })
}

/// `first_name` → `firstName`
pub fn lower_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '_' || ch == '-' {
            upper_next = !out.is_empty();
            continue;
        }
        if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else if out.is_empty() {
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// `userObjectId` → `user_object_id`, `HTTPServer` → `http_server`
pub fn underscore(name: &str) -> String {
    let word = acronym_boundary_regex().replace_all(name, "${1}_${2}");
    let word = word_boundary_regex().replace_all(&word, "${1}_${2}");
    word.replace('-', "_").to_lowercase()
}

/// Element name for an identifier field: `parent_id` → `parentObjectId`
pub fn object_id_selector(field: &str) -> String {
    let expanded = id_suffix_regex().replace(field, "${1}object_id");
    lower_camel_case(&expanded)
}

/// Field name for a foreign element name: `userObjectId` → `user_id`
pub fn field_for_element(element: &str) -> String {
    let leaf = element.rsplit('/').next().unwrap_or(element);
    underscore(&leaf.replace("Object", "").replace("object", ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lower_camel_case() {
        assert_eq!(lower_camel_case("first_name"), "firstName");
        assert_eq!(lower_camel_case("created_at"), "createdAt");
        assert_eq!(lower_camel_case("body"), "body");
        assert_eq!(lower_camel_case("is_rockstar"), "isRockstar");
        assert_eq!(lower_camel_case("Title"), "title");
        assert_eq!(lower_camel_case("_leading"), "leading");
    }

    #[test]
    fn test_object_id_selector() {
        assert_eq!(object_id_selector("id"), "objectId");
        assert_eq!(object_id_selector("user_id"), "userObjectId");
        assert_eq!(object_id_selector("parent_id"), "parentObjectId");
        // only a trailing id segment is rewritten
        assert_eq!(object_id_selector("video_id"), "videoObjectId");
        assert_eq!(object_id_selector("idle"), "idle");
    }

    #[test]
    fn test_underscore() {
        assert_eq!(underscore("userObjectId"), "user_object_id");
        assert_eq!(underscore("firstName"), "first_name");
        assert_eq!(underscore("HTTPServer"), "http_server");
        assert_eq!(underscore("already_snake"), "already_snake");
        assert_eq!(underscore("dash-case"), "dash_case");
    }

    #[test]
    fn test_field_for_element() {
        assert_eq!(field_for_element("objectId"), "id");
        assert_eq!(field_for_element("userObjectId"), "user_id");
        assert_eq!(field_for_element("createdAt"), "created_at");
        assert_eq!(field_for_element("user/firstName"), "first_name");
    }
}
