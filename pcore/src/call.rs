// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Parses a submitted call's template body (§3's semantic function *body*: a sequence
//! of constants and placeholder references, written `{{name}}`) into the
//! `CallSegment`s `process::rewrite_call` expects.

use std::collections::HashMap;
use std::fmt;

use graph::{Placeholder, SamplingConfig};
use process::CallSegment;
use serde::{Deserialize, Serialize};
use svar::SvId;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputBinding {
    /// A literal value baked into this call.
    Const(String),
    /// A reference to a variable produced by an earlier call in the same VM.
    Var(u64),
}

/// A semantic call as submitted over `/submit_call` (§6): a template body plus the
/// bindings for every placeholder it references.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Call {
    pub body: String,
    pub inputs: HashMap<String, InputBinding>,
    pub outputs: HashMap<String, SamplingConfig>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// A `{{name}}` reference that is neither a declared input nor output.
    UnknownPlaceholder(String),
    /// Two output placeholders with no literal text between them: the engine has
    /// nothing to anchor where one generation ends and the next begins.
    OutputAdjacency(String),
    /// A `{{` was never closed by a matching `}}`.
    Unterminated,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnknownPlaceholder(name) => write!(f, "{name} is not a declared input or output"),
            ParseError::OutputAdjacency(name) => {
                write!(f, "output placeholder {name} is adjacent to another output with no text between them")
            }
            ParseError::Unterminated => write!(f, "unterminated {{{{ in call body"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Rewrites `call.body` into a chain of `CallSegment`s in template order.
pub fn parse(call: &Call) -> Result<Vec<CallSegment>, ParseError> {
    let mut segments = Vec::new();
    let mut last_was_output = false;
    let mut rest = call.body.as_str();

    loop {
        let Some(start) = rest.find("{{") else {
            if !rest.is_empty() {
                segments.push(CallSegment::Constant(rest.to_owned()));
            }
            break;
        };

        let literal = &rest[..start];
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            return Err(ParseError::Unterminated);
        };
        let name = after_open[..end].trim();
        rest = &after_open[end + 2..];

        if !literal.is_empty() {
            segments.push(CallSegment::Constant(literal.to_owned()));
            last_was_output = false;
        }

        if let Some(sampling_config) = call.outputs.get(name) {
            if last_was_output {
                return Err(ParseError::OutputAdjacency(name.to_owned()));
            }
            segments.push(CallSegment::Output(Placeholder::output(name, sampling_config.clone())));
            last_was_output = true;
        } else if let Some(binding) = call.inputs.get(name) {
            let placeholder = match binding {
                InputBinding::Const(value) => Placeholder::input_with_const(name, value.clone()),
                InputBinding::Var(id) => Placeholder::input_with_var(name, SvId(*id)),
            };
            segments.push(CallSegment::Input(placeholder));
            last_was_output = false;
        } else {
            return Err(ParseError::UnknownPlaceholder(name.to_owned()));
        }
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(body: &str, inputs: &[(&str, InputBinding)], outputs: &[&str]) -> Call {
        Call {
            body: body.to_owned(),
            inputs: inputs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            outputs: outputs.iter().map(|k| (k.to_string(), SamplingConfig::default())).collect(),
        }
    }

    #[test]
    fn a_body_with_no_placeholders_is_one_constant_segment() {
        let segments = parse(&call("just text", &[], &[])).unwrap();
        assert_eq!(segments.len(), 1);
        assert!(matches!(segments[0], CallSegment::Constant(ref s) if s == "just text"));
    }

    #[test]
    fn single_constant_then_output() {
        let segments = parse(&call("Hello, {{out}}", &[], &["out"])).unwrap();
        assert_eq!(segments.len(), 2);
        assert!(matches!(segments[0], CallSegment::Constant(ref s) if s == "Hello, "));
        assert!(matches!(segments[1], CallSegment::Output(ref p) if p.name == "out"));
    }

    #[test]
    fn an_input_reusing_a_variable_carries_its_var_id() {
        let segments = parse(&call("{{x}} and more", &[("x", InputBinding::Var(7))], &[])).unwrap();
        assert!(matches!(&segments[0], CallSegment::Input(p) if p.var_id == Some(SvId(7))));
    }

    #[test]
    fn unbound_placeholder_fails_to_parse() {
        let err = parse(&call("{{mystery}}", &[], &[])).unwrap_err();
        assert_eq!(err, ParseError::UnknownPlaceholder("mystery".to_owned()));
    }

    #[test]
    fn adjacent_outputs_with_no_text_between_them_are_rejected() {
        let err = parse(&call("{{a}}{{b}}", &[], &["a", "b"])).unwrap_err();
        assert_eq!(err, ParseError::OutputAdjacency("b".to_owned()));
    }

    #[test]
    fn outputs_separated_by_text_are_fine() {
        let segments = parse(&call("{{a}} then {{b}}", &[], &["a", "b"])).unwrap();
        assert_eq!(segments.len(), 3);
    }

    #[test]
    fn unterminated_placeholder_fails_to_parse() {
        let err = parse(&call("{{oops", &[], &[])).unwrap_err();
        assert_eq!(err, ParseError::Unterminated);
    }
}
