use std::sync::OnceLock;
use regex::Regex;
use shared::types::TemplateType;
use crate::error::ApiError;

/// Template selection parsed from an `events` form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSpecifier {
    pub template_name: String,
    pub template_type: Option<TemplateType>,
}

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^template=([A-Za-z0-9_]+)(?:,type=([A-Za-z0-9_]+))?$")
            .expect("template pattern is valid")
    })
}

/// Parse `template=<NAME>[,type=<TYPE>]`. The type is matched
/// case-insensitively against the known template types.
pub fn parse_event_specifier(specifier: &str) -> Result<EventSpecifier, ApiError> {
    let captures = template_pattern()
        .captures(specifier)
        .ok_or_else(|| ApiError::bad_input(specifier))?;

    let template_name = captures[1].to_string();
    let template_type = match captures.get(2) {
        Some(t) => Some(TemplateType::from_name(t.as_str()).ok_or_else(|| {
            ApiError::bad_input(format!("Invalid event template type {}", t.as_str()))
        })?),
        None => None,
    };

    Ok(EventSpecifier {
        template_name,
        template_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(name: &str, template_type: Option<TemplateType>) -> EventSpecifier {
        EventSpecifier {
            template_name: name.to_string(),
            template_type,
        }
    }

    #[test]
    fn test_name_only() {
        assert_eq!(parse_event_specifier("template=Profiling").unwrap(), parsed("Profiling", None));
        assert_eq!(parse_event_specifier("template=ALL").unwrap(), parsed("ALL", None));
    }

    #[test]
    fn test_name_and_type() {
        assert_eq!(
            parse_event_specifier("template=Profiling,type=TARGET").unwrap(),
            parsed("Profiling", Some(TemplateType::Target))
        );
        assert_eq!(
            parse_event_specifier("template=my_template,type=custom").unwrap(),
            parsed("my_template", Some(TemplateType::Custom))
        );
    }

    #[test]
    fn test_rejects_everything_else() {
        for input in [
            "",
            "template=",
            "Profiling",
            "template=Profiling,",
            "template=Profiling,type=",
            "template=Profiling,type=BUILTIN",
            "template=Pro filing",
            "template=Profiling;type=TARGET",
            " template=Profiling",
            "template=Profiling\n",
            "jdk.CPULoad:enabled=true",
        ] {
            let err = parse_event_specifier(input).unwrap_err();
            assert!(matches!(err, ApiError::BadInput(_)), "accepted {:?}", input);
        }
    }
}
