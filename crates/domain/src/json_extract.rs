//! LLM responses asked to "respond with JSON only" routinely wrap the object
//! in prose or a markdown fence anyway. This pulls out the first balanced
//! `{...}` span so callers can hand it to `serde_json` without caring how
//! the model dressed it up.

/// Returns the substring of `text` spanning the first balanced top-level
/// JSON object, or `None` if no balanced `{...}` exists. Ignores braces
/// inside string literals so a value like `"{"` doesn't throw off the
/// depth count.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
