//! Pulling a JSON document out of generated text

use lazy_static::lazy_static;
use log::{debug, trace};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Error;

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"```[A-Za-z0-9_-]*")
        .expect("code fence pattern is valid");
}

/// Parse the first JSON object or array found in `text`.
///
/// Code fences are dropped, the first `{`/`[` span is taken,
/// and one trailing-comma repair is tried if parsing fails.
pub fn extract_json(text: &str) -> Result<Value, Error>
{   if text.trim().is_empty()
    {   return Err(Error::EmptyInput);
    }

    let stripped = strip_code_fences(text);
    let span = find_json_span(&stripped).ok_or_else(|| {
      Error::MalformedJson("no JSON object or array found".to_string())
    })?;
    trace!("JSON span: {}", span);

    match serde_json::from_str(span)
    {   Ok(value) => Ok(value)
      , Err(first) => {
          debug!("JSON parse failed ({}), repairing trailing commas", first);
          let repaired = remove_trailing_commas(span);
          serde_json::from_str(&repaired).map_err(|second| {
            Error::MalformedJson(format!(
              "{} (after repair: {})", first, second
            ))
          })
        }
    }
}

/// [`extract_json`] then deserialize into `T`.
pub fn extract_json_as<T>(text: &str) -> Result<T, Error>
where
  T: DeserializeOwned
{   let value = extract_json(text)?;
    serde_json::from_value(value)
      .map_err(|e| Error::MalformedJson(e.to_string()))
}

fn strip_code_fences(text: &str) -> String
{   CODE_FENCE.replace_all(text, "").into_owned()
}

/// Drop commas that sit directly before a closing bracket,
/// leaving string contents untouched.
fn remove_trailing_commas(text: &str) -> String
{   let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut copied = 0;

    for (i, &byte) in bytes.iter().enumerate()
    {   if in_string
        {   match byte
            {   _ if escaped => escaped = false
              , b'\\' => escaped = true
              , b'"' => in_string = false
              , _ => {}
            }
            continue;
        }
        match byte
        {   b'"' => in_string = true
          , b',' => {
              let next = bytes[i + 1..].iter()
                .find(|b| !b.is_ascii_whitespace());
              if matches!(next, Some(b'}') | Some(b']'))
              {   out.push_str(&text[copied..i]);
                  copied = i + 1;
              }
            }
          , _ => {}
        }
    }
    out.push_str(&text[copied..]);
    out
}

/// First `{...}` or `[...]` span. Brackets inside strings are
/// skipped. An unbalanced span runs to the last matching closer.
fn find_json_span(text: &str) -> Option<&str>
{   let start = text.find(|c: char| c == '{' || c == '[')?;
    let opener = text.as_bytes()[start];
    let closer = if opener == b'{' { b'}' } else { b']' };

    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in text.as_bytes()[start..].iter().enumerate()
    {   if in_string
        {   match byte
            {   _ if escaped => escaped = false
              , b'\\' => escaped = true
              , b'"' => in_string = false
              , _ => {}
            }
            continue;
        }
        match byte
        {   b'"' => in_string = true
          , b'{' => stack.push(b'}')
          , b'[' => stack.push(b']')
          , b'}' | b']' => {
              if stack.pop() != Some(byte)
              {   break;
              }
              if stack.is_empty()
              {   return Some(&text[start..=start + offset]);
              }
            }
          , _ => {}
        }
    }

    let end = text.as_bytes().iter().rposition(|&b| b == closer)?;
    if end > start
    {   Some(&text[start..=end])
    } else
    {   None
    }
}
