//! Table and column name sanitization.
//!
//! Catalog names must match `[a-z0-9_]+`. Sanitizing:
//! 1. folds accented Latin letters to their base letter
//! 2. replaces each run of characters outside `[A-Za-z0-9_]` with one `_`
//! 3. splits camelCase boundaries with `_`
//! 4. lowercases

use crate::{Error, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static INVALID_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]+").expect("valid regex"));

static CAMEL_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid regex"));

/// Sanitize a table name.
pub fn sanitize_table_name(name: &str) -> String {
    sanitize(name)
}

/// Sanitize a column name.
pub fn sanitize_column_name(name: &str) -> String {
    sanitize(name)
}

fn sanitize(name: &str) -> String {
    let folded: String = name.chars().map(fold_accent).collect();
    let replaced = INVALID_RUN.replace_all(&folded, "_");
    CAMEL_BOUNDARY
        .replace_all(&replaced, "${1}_${2}")
        .to_lowercase()
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'Á' | 'À' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' | 'Ą' => 'A',
        'ç' | 'ć' | 'č' | 'ĉ' | 'ċ' => 'c',
        'Ç' | 'Ć' | 'Č' | 'Ĉ' | 'Ċ' => 'C',
        'ď' => 'd',
        'Ď' => 'D',
        'é' | 'è' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' | 'Ē' | 'Ė' | 'Ę' | 'Ě' => 'E',
        'ğ' | 'ģ' => 'g',
        'Ğ' | 'Ģ' => 'G',
        'í' | 'ì' | 'î' | 'ï' | 'ī' | 'į' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' | 'Ī' | 'Į' | 'İ' => 'I',
        'ľ' | 'ĺ' | 'ļ' => 'l',
        'Ľ' | 'Ĺ' | 'Ļ' => 'L',
        'ñ' | 'ń' | 'ň' | 'ņ' => 'n',
        'Ñ' | 'Ń' | 'Ň' | 'Ņ' => 'N',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'ō' | 'ő' => 'o',
        'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' | 'Ō' | 'Ő' => 'O',
        'ŕ' | 'ř' => 'r',
        'Ŕ' | 'Ř' => 'R',
        'ś' | 'š' | 'ş' => 's',
        'Ś' | 'Š' | 'Ş' => 'S',
        'ť' | 'ţ' => 't',
        'Ť' | 'Ţ' => 'T',
        'ú' | 'ù' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' | 'ų' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' | 'Ū' | 'Ů' | 'Ű' | 'Ų' => 'U',
        'ý' | 'ÿ' => 'y',
        'Ý' | 'Ÿ' => 'Y',
        'ź' | 'ż' | 'ž' => 'z',
        'Ź' | 'Ż' | 'Ž' => 'Z',
        other => other,
    }
}

/// Mapping from original to sanitized column names.
#[derive(Debug, Clone, Default)]
pub struct SanitizedNames {
    renamed: HashMap<String, String>,
}

impl SanitizedNames {
    /// Sanitize a set of column names, rejecting collisions.
    ///
    /// Two distinct names that sanitize to the same name (`A` and `a`) are an
    /// `InvalidArgumentValue` error.
    pub fn build<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut renamed = HashMap::new();
        let mut seen: HashMap<String, String> = HashMap::new();
        for name in names {
            let sanitized = sanitize_column_name(name);
            if sanitized.is_empty() {
                return Err(Error::invalid_value(format!(
                    "Column name '{}' is empty after sanitization",
                    name
                )));
            }
            if let Some(previous) = seen.get(&sanitized) {
                if previous != name {
                    return Err(Error::invalid_value(format!(
                        "Columns '{}' and '{}' collide as '{}' after sanitization",
                        previous, name, sanitized
                    )));
                }
            }
            seen.insert(sanitized.clone(), name.to_string());
            renamed.insert(name.to_string(), sanitized);
        }
        Ok(Self { renamed })
    }

    /// Sanitized form of `name`, sanitizing names not seen at build time.
    pub fn get(&self, name: &str) -> String {
        self.renamed
            .get(name)
            .cloned()
            .unwrap_or_else(|| sanitize_column_name(name))
    }

    /// Apply the renaming to the keys of a map.
    pub fn rename_keys<V: Clone>(&self, map: &HashMap<String, V>) -> HashMap<String, V> {
        map.iter().map(|(k, v)| (self.get(k), v.clone())).collect()
    }
}
