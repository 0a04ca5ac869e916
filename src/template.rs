//! GLSL code templates with an explicit per-instance substitution point.
//!
//! Effect code is written once in the catalog and instantiated once per stack
//! entry. Every symbol that must be unique per instance carries `${id}`, which
//! expands to the entry's position in the stack. `$$` is a literal `$`; any
//! other use of `$` is rejected when the template is parsed, so ordinary code
//! text can never be mistaken for a substitution.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TemplateError;

const INSTANCE_PARAM: &str = "id";

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Text(String),
    InstanceId,
}

/// A parsed code template.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CodeTemplate {
    segments: Vec<Segment>,
}

impl CodeTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut rest = source;
        let mut offset = 0usize;

        while let Some(pos) = rest.find('$') {
            text.push_str(&rest[..pos]);
            let at = offset + pos;
            let after = &rest[pos + 1..];

            if let Some(tail) = after.strip_prefix('$') {
                text.push('$');
                offset = at + 2;
                rest = tail;
                continue;
            }

            let Some(inner) = after.strip_prefix('{') else {
                return Err(TemplateError::StrayDollar(at));
            };
            let Some(close) = inner.find('}') else {
                return Err(TemplateError::Unterminated(at));
            };
            let name = inner[..close].trim();
            if name != INSTANCE_PARAM {
                return Err(TemplateError::UnknownParameter {
                    name: name.to_string(),
                    offset: at,
                });
            }

            if !text.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut text)));
            }
            segments.push(Segment::InstanceId);

            let consumed = 2 + close + 1;
            offset = at + consumed;
            rest = &rest[pos + consumed..];
        }

        text.push_str(rest);
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Ok(Self { segments })
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether the template contains at least one `${id}` substitution.
    pub fn is_instanced(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::InstanceId))
    }

    /// Expand the template for the entry at stack position `id`.
    pub fn instantiate(&self, id: usize) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::InstanceId => out.push_str(&id.to_string()),
            }
        }
        out
    }
}

impl TryFrom<String> for CodeTemplate {
    type Error = TemplateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for CodeTemplate {
    type Error = TemplateError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<CodeTemplate> for String {
    fn from(value: CodeTemplate) -> Self {
        value.to_string()
    }
}

impl fmt::Display for CodeTemplate {
    /// Writes the template back in its source form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => f.write_str(&text.replace('$', "$$"))?,
                Segment::InstanceId => f.write_str("${id}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instantiate_replaces_every_occurrence() {
        let t = CodeTemplate::parse("float v${id} = u_amount${id};").unwrap();
        assert_eq!(t.instantiate(3), "float v3 = u_amount3;");
        assert!(t.is_instanced());
    }

    #[test]
    fn test_plain_code_passes_through() {
        let src = "color.rgb = vec3(1.0) - color.rgb;\n{ int x = 1; }";
        let t = CodeTemplate::parse(src).unwrap();
        assert_eq!(t.instantiate(0), src);
        assert!(!t.is_instanced());
    }

    #[test]
    fn test_escaped_dollar_is_literal() {
        let t = CodeTemplate::parse("// cost $$5 for ${id}").unwrap();
        assert_eq!(t.instantiate(12), "// cost $5 for 12");
        assert_eq!(t.to_string(), "// cost $$5 for ${id}");
    }

    #[test]
    fn test_rejects_stray_and_unknown_substitutions() {
        assert_eq!(
            CodeTemplate::parse("a $b").unwrap_err(),
            TemplateError::StrayDollar(2)
        );
        assert_eq!(
            CodeTemplate::parse("x${index}").unwrap_err(),
            TemplateError::UnknownParameter {
                name: "index".to_string(),
                offset: 1
            }
        );
        assert_eq!(
            CodeTemplate::parse("x${id").unwrap_err(),
            TemplateError::Unterminated(1)
        );
    }

    #[test]
    fn test_serde_uses_source_form() {
        let t: CodeTemplate = serde_json::from_str("\"c${id} += 1.0;\"").unwrap();
        assert_eq!(t.instantiate(7), "c7 += 1.0;");
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"c${id} += 1.0;\"");
        assert!(serde_json::from_str::<CodeTemplate>("\"$x\"").is_err());
    }
}
