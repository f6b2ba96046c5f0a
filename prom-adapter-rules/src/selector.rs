use thiserror::Error;

/// Label-selector operators, as Kubernetes defines them.
///
/// `GreaterThan`/`LessThan` are parseable but have no backend equivalent; the
/// query builder rejects them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Equals,
    DoubleEquals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
    GreaterThan,
    LessThan,
}

/// One parsed selector requirement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    pub values: Vec<String>,
}

impl Requirement {
    pub fn new(key: impl ToString, operator: Operator, values: Vec<String>) -> Self {
        Self {
            key: key.to_string(),
            operator,
            values,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SelectorParseError {
    #[error("invalid selector clause {0:?}")]
    InvalidClause(String),

    #[error("unbalanced parentheses in selector {0:?}")]
    UnbalancedParens(String),
}

/// Parse a `labelSelector` string into requirements.
///
/// Supports the apimachinery grammar: `k=v`, `k==v`, `k!=v`,
/// `k in (a,b)`, `k notin (a,b)`, `k` (exists), `!k` (does not exist),
/// `k>1`, `k<1`, joined by commas.
pub fn parse(selector: &str) -> Result<Vec<Requirement>, SelectorParseError> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Ok(Vec::new());
    }

    split_clauses(selector)?
        .into_iter()
        .map(|clause| parse_clause(clause.trim()))
        .collect()
}

/// Split on top-level commas, leaving `in (a,b)` value lists intact.
fn split_clauses(selector: &str) -> Result<Vec<&str>, SelectorParseError> {
    let mut clauses = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (index, ch) in selector.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| SelectorParseError::UnbalancedParens(selector.to_string()))?;
            }
            ',' if depth == 0 => {
                clauses.push(&selector[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SelectorParseError::UnbalancedParens(selector.to_string()));
    }
    clauses.push(&selector[start..]);
    Ok(clauses)
}

fn parse_clause(clause: &str) -> Result<Requirement, SelectorParseError> {
    if clause.is_empty() {
        return Err(SelectorParseError::InvalidClause(clause.to_string()));
    }

    if let Some(key) = clause.strip_prefix('!') {
        return Ok(Requirement::new(
            key.trim(),
            Operator::DoesNotExist,
            Vec::new(),
        ));
    }

    // Set-based forms: `key in (a,b)` / `key notin (a,b)`.
    for (word, operator) in [(" notin ", Operator::NotIn), (" in ", Operator::In)] {
        if let Some(position) = clause.find(word) {
            let key = clause[..position].trim();
            let values = clause[position + word.len()..].trim();
            let values = values
                .strip_prefix('(')
                .and_then(|rest| rest.strip_suffix(')'))
                .ok_or_else(|| SelectorParseError::InvalidClause(clause.to_string()))?;
            let values = values
                .split(',')
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .collect();
            return Ok(Requirement::new(key, operator, values));
        }
    }

    // Binary forms, longest operators first so `!=`/`==` win over `=`.
    for (symbol, operator) in [
        ("!=", Operator::NotEquals),
        ("==", Operator::DoubleEquals),
        ("=", Operator::Equals),
        (">", Operator::GreaterThan),
        ("<", Operator::LessThan),
    ] {
        if let Some(position) = clause.find(symbol) {
            let key = clause[..position].trim();
            let value = clause[position + symbol.len()..].trim();
            if key.is_empty() {
                return Err(SelectorParseError::InvalidClause(clause.to_string()));
            }
            return Ok(Requirement::new(
                key,
                operator,
                vec![value.to_string()],
            ));
        }
    }

    // Bare key: existence.
    Ok(Requirement::new(clause.trim(), Operator::Exists, Vec::new()))
}
