//! Parser for the textual task array form, `[a, b, [c, d]]`

use crate::error::{TaskError, TaskResult};

/// A parsed array element: a bare string or a nested array
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayElement {
    Str(String),
    Array(Vec<ArrayElement>),
}

impl From<&str> for ArrayElement {
    fn from(text: &str) -> Self {
        ArrayElement::Str(text.to_string())
    }
}

/// Parse a bracketed, comma separated array into nested elements.
///
/// Elements are trimmed and empty elements dropped, so `"[ ,]"` is an
/// empty array. Blank input parses to an empty array.
pub fn parse_array(input: &str) -> TaskResult<Vec<ArrayElement>> {
    let mut rest = input.trim();
    if rest.is_empty() {
        return Ok(Vec::new());
    }

    // Arrays still open, innermost last. `current` holds the elements of
    // the innermost one; the outermost holder collects the result.
    let mut open: Vec<Vec<ArrayElement>> = Vec::new();
    let mut current: Vec<ArrayElement> = Vec::new();

    loop {
        if let Some(after) = rest.strip_prefix('[') {
            open.push(std::mem::take(&mut current));
            rest = after.trim_start();
            continue;
        }

        if open.is_empty() {
            return Err(TaskError::InvalidArray(format!(
                "array missing [ at '{}'",
                rest
            )));
        }

        let end = rest
            .find([']', ','])
            .ok_or_else(|| TaskError::InvalidArray(format!("array missing ] in '{}'", input)))?;

        let element = rest[..end].trim();
        if !element.is_empty() {
            current.push(ArrayElement::Str(element.to_string()));
        }

        let closing = rest[end..].starts_with(']');
        rest = rest[end + 1..].trim_start();

        if closing {
            let Some(parent) = open.pop() else {
                return Err(TaskError::InvalidArray(format!(
                    "extra ] in '{}'",
                    input
                )));
            };
            let finished = std::mem::replace(&mut current, parent);
            current.push(ArrayElement::Array(finished));
            if let Some(after) = rest.strip_prefix(',') {
                rest = after.trim_start();
            }
        }

        if rest.is_empty() {
            break;
        }
        if open.is_empty() {
            return Err(TaskError::InvalidArray(format!(
                "extra data at end of array in '{}'",
                input
            )));
        }
    }

    if !open.is_empty() {
        return Err(TaskError::InvalidArray(format!(
            "array missing ] in '{}'",
            input
        )));
    }

    match current.into_iter().next() {
        Some(ArrayElement::Array(items)) => Ok(items),
        _ => Err(TaskError::InvalidArray(format!("no array in '{}'", input))),
    }
}
