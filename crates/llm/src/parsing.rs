//! Разбор списков из свободного текста модели.
//!
//! Модель отвечает по-разному: JSON массивом, нумерованным списком,
//! маркированным списком или одной строкой через запятую. Все варианты
//! приводятся к списку чистых строк без повторов, не длиннее `MAX_LIST_ITEMS`.

use std::collections::HashSet;

pub const MAX_LIST_ITEMS: usize = 10;

/// Что просили у модели: от этого зависит, можно ли резать строку по запятым
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Keywords,
    /// Фразы бывают целыми предложениями с запятой внутри
    Phrases,
}

pub fn parse_list_output(response: &str, kind: ListKind) -> Vec<String> {
    let cleaned_response = response.trim();

    if let Some(items) = parse_json_array(cleaned_response) {
        return normalize(items.iter().map(String::as_str));
    }

    let lines: Vec<&str> = cleaned_response
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if lines.len() == 1 && splits_on_commas(lines[0], kind) {
        return normalize(lines[0].split(','));
    }

    normalize(lines.into_iter())
}

fn splits_on_commas(line: &str, kind: ListKind) -> bool {
    if !line.contains(',') {
        return false;
    }
    match kind {
        ListKind::Keywords => true,
        ListKind::Phrases => !line.contains(|c| matches!(c, '.' | '?' | '!')),
    }
}

fn parse_json_array(response: &str) -> Option<Vec<String>> {
    let start = response.find('[')?;
    let end = response.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Vec<String>>(&response[start..=end]).ok()
}

fn normalize<'a>(items: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();

    for raw in items {
        let item = clean_item(raw);
        // "Keywords:" и прочие заголовки
        if item.is_empty() || item.ends_with(':') {
            continue;
        }
        if seen.insert(item.to_lowercase()) {
            result.push(item);
        }
        if result.len() == MAX_LIST_ITEMS {
            break;
        }
    }

    result
}

fn clean_item(raw: &str) -> String {
    let item = strip_list_marker(raw).trim().trim_end_matches(',').trim();
    item.trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}

fn strip_list_marker(item: &str) -> &str {
    let trimmed = item
        .trim_start()
        .trim_start_matches(|c| c == '-' || c == '*' || c == '•')
        .trim_start();

    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &trimmed[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim_start();
        }
    }

    trimmed
}
