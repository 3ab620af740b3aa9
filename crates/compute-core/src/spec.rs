//! Processor spec documents: the public description of an app's processors
//! that the daemon fetches from a spec URI, validates, and reports back to the
//! control plane.

use serde::{Deserialize, Serialize};

fn is_false(b: &bool) -> bool {
    !*b
}

/// Declared type of a processor parameter.
///
/// The set is closed; a spec with any other type string fails to parse.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ParameterType {
    /// A string value.
    #[serde(rename = "str")]
    Str,
    /// An integer value.
    #[serde(rename = "int")]
    Int,
    /// A float value.
    #[serde(rename = "float")]
    Float,
    /// A boolean value.
    #[serde(rename = "bool")]
    Bool,
    /// A list of strings.
    #[serde(rename = "List[str]")]
    StrList,
    /// A list of integers.
    #[serde(rename = "List[int]")]
    IntList,
    /// A list of floats.
    #[serde(rename = "List[float]")]
    FloatList,
    /// A list of booleans.
    #[serde(rename = "List[bool]")]
    BoolList,
}

/// An input file slot of a processor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessorInput {
    /// Input name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Whether the input is a list (bound as `name[0]`, `name[1]`, ...).
    #[serde(default, skip_serializing_if = "is_false")]
    pub list: bool,
}

/// An output file slot of a processor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessorOutput {
    /// Output name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
}

/// A parameter of a processor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorParameter {
    /// Parameter name; dotted names (`group.inner`) are plain string keys.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub parameter_type: ParameterType,
    /// Default value applied when the job binds none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Whitelist of permitted values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<serde_json::Value>>,
    /// Whether values of this parameter are secrets.
    #[serde(default, skip_serializing_if = "is_false")]
    pub secret: bool,
}

/// A free-form attribute of a processor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorAttribute {
    /// Attribute name.
    pub name: String,
    /// Attribute value.
    pub value: serde_json::Value,
}

/// A tag of a processor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessorTag {
    /// The tag text.
    pub tag: String,
}

/// The public spec of a single processor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorSpec {
    /// Processor name, unique across all apps loaded by one daemon.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Input file slots.
    pub inputs: Vec<ProcessorInput>,
    /// Output file slots.
    pub outputs: Vec<ProcessorOutput>,
    /// Parameters.
    pub parameters: Vec<ProcessorParameter>,
    /// Free-form attributes.
    pub attributes: Vec<ProcessorAttribute>,
    /// Tags.
    pub tags: Vec<ProcessorTag>,
}

/// The public spec of an app: what gets reported to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    /// App name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Container image the app runs in, when containerized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_image: Option<String>,
    /// Path of the app executable (inside the image, or on the host).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_executable: Option<String>,
    /// Processors the app provides, in declaration order.
    pub processors: Vec<ProcessorSpec>,
}

/// Aggregate spec document reported to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputeResourceSpec {
    /// Specs of every loaded app.
    pub apps: Vec<AppSpec>,
}

/// Returns the pair `(name, nested)` if the processor declares a parameter
/// whose dotted name nests under another declared parameter, e.g. both `a`
/// and `a.b`. Such specs are ambiguous and rejected at load time.
pub fn find_ambiguous_parameter(spec: &ProcessorSpec) -> Option<(String, String)> {
    let names: std::collections::HashSet<&str> =
        spec.parameters.iter().map(|p| p.name.as_str()).collect();
    for parameter in &spec.parameters {
        let name = parameter.name.as_str();
        let mut end = 0;
        for part in name.split('.') {
            end += part.len();
            if end == name.len() {
                break;
            }
            let prefix = &name[..end];
            if names.contains(prefix) {
                return Some((prefix.to_string(), name.to_string()));
            }
            end += 1; // the dot
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor_with_parameters(names: &[&str]) -> ProcessorSpec {
        ProcessorSpec {
            name: "p".into(),
            description: String::new(),
            inputs: vec![],
            outputs: vec![],
            parameters: names
                .iter()
                .map(|name| ProcessorParameter {
                    name: (*name).into(),
                    description: String::new(),
                    parameter_type: ParameterType::Int,
                    default: None,
                    options: None,
                    secret: false,
                })
                .collect(),
            attributes: vec![],
            tags: vec![],
        }
    }

    #[test]
    fn parameter_type_strings_round_trip() {
        for (ty, s) in [
            (ParameterType::Str, r#""str""#),
            (ParameterType::Int, r#""int""#),
            (ParameterType::Float, r#""float""#),
            (ParameterType::Bool, r#""bool""#),
            (ParameterType::StrList, r#""List[str]""#),
            (ParameterType::IntList, r#""List[int]""#),
            (ParameterType::FloatList, r#""List[float]""#),
            (ParameterType::BoolList, r#""List[bool]""#),
        ] {
            assert_eq!(serde_json::to_string(&ty).unwrap(), s);
            assert_eq!(serde_json::from_str::<ParameterType>(s).unwrap(), ty);
        }
        assert!(serde_json::from_str::<ParameterType>(r#""List[complex]""#).is_err());
    }

    #[test]
    fn app_spec_round_trips() {
        let spec = AppSpec {
            name: "test-app".into(),
            description: "An app".into(),
            app_image: Some("ghcr.io/example/test-app:latest".into()),
            app_executable: Some("/app/main".into()),
            processors: vec![ProcessorSpec {
                name: "test_processor".into(),
                description: "desc".into(),
                inputs: vec![ProcessorInput {
                    name: "input".into(),
                    description: String::new(),
                    list: false,
                }],
                outputs: vec![ProcessorOutput {
                    name: "output".into(),
                    description: String::new(),
                }],
                parameters: vec![
                    ProcessorParameter {
                        name: "threshold".into(),
                        description: String::new(),
                        parameter_type: ParameterType::Float,
                        default: Some(serde_json::json!(0.5)),
                        options: None,
                        secret: false,
                    },
                    ProcessorParameter {
                        name: "api_key".into(),
                        description: String::new(),
                        parameter_type: ParameterType::Str,
                        default: None,
                        options: None,
                        secret: true,
                    },
                ],
                attributes: vec![ProcessorAttribute {
                    name: "wip".into(),
                    value: serde_json::json!(true),
                }],
                tags: vec![ProcessorTag { tag: "spike_sorting".into() }],
            }],
        };

        let emitted = serde_json::to_value(&spec).unwrap();
        let parsed: AppSpec = serde_json::from_value(emitted.clone()).unwrap();
        assert_eq!(parsed, spec);

        // Optional markers are only emitted when set.
        let processor = &emitted["processors"][0];
        assert!(processor["inputs"][0].get("list").is_none());
        assert!(processor["parameters"][0].get("secret").is_none());
        assert_eq!(processor["parameters"][1]["secret"], serde_json::json!(true));
    }

    #[test]
    fn nested_parameter_under_plain_name_is_ambiguous() {
        let spec = processor_with_parameters(&["a", "a.b"]);
        assert_eq!(
            find_ambiguous_parameter(&spec),
            Some(("a".to_string(), "a.b".to_string()))
        );

        let spec = processor_with_parameters(&["group.x", "group.y", "other"]);
        assert_eq!(find_ambiguous_parameter(&spec), None);

        // A shared prefix that is not itself a parameter is fine.
        let spec = processor_with_parameters(&["ab", "a.b"]);
        assert_eq!(find_ambiguous_parameter(&spec), None);
    }
}
