//! Запасные списки и нормализация результатов генерации до ровно 10 элементов.

use conversations::ENRICHMENT_SIZE;
use std::collections::HashSet;

/// Меньше этого числа сгенерированных элементов - берём запасной список целиком
pub const MIN_GENERATED_ITEMS: usize = 5;

pub const FALLBACK_KEYWORDS: [&str; ENRICHMENT_SIZE] = [
    "I need help with",
    "looking for solutions",
    "my business is struggling",
    "need support",
    "anyone know a good",
    "recommendations for",
    "just started",
    "trying to find",
    "need advice",
    "help me with",
];

pub const FALLBACK_PHRASES: [&str; ENRICHMENT_SIZE] = [
    "I need help with this situation",
    "Looking for advice and support",
    "Anyone been through something similar?",
    "My family member is struggling with this",
    "Seeking recommendations from the community",
    "Does anyone know where to get help?",
    "Just diagnosed and need guidance",
    "Support group recommendations needed",
    "Looking for treatment options",
    "Anyone have experience with this?",
];

/// Список после нормализации
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub items: Vec<String>,
    /// Сгенерированного оказалось мало, список целиком запасной
    pub used_fallback: bool,
}

/// Привести сгенерированный список к ровно `ENRICHMENT_SIZE` элементам.
///
/// Пустые строки отбрасываются. Если осталось меньше `MIN_GENERATED_ITEMS`,
/// возвращается `fallback` целиком. Иначе список обрезается до 10 и при
/// нехватке дополняется из `fallback` без повторов.
pub fn normalize(generated: Vec<String>, fallback: &[&str; ENRICHMENT_SIZE]) -> Normalized {
    let mut items: Vec<String> = generated
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();

    if items.len() < MIN_GENERATED_ITEMS {
        return Normalized {
            items: fallback.iter().map(|s| s.to_string()).collect(),
            used_fallback: true,
        };
    }

    items.truncate(ENRICHMENT_SIZE);

    let mut seen: HashSet<String> = items.iter().map(|item| item.to_lowercase()).collect();
    for candidate in fallback.iter() {
        if items.len() == ENRICHMENT_SIZE {
            break;
        }
        if seen.insert(candidate.to_lowercase()) {
            items.push(candidate.to_string());
        }
    }

    Normalized {
        items,
        used_fallback: false,
    }
}
