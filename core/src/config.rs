//! Engine configuration.
//!
//! Only language-agnostic engine behaviour lives here. Input methods built on
//! the engine embed this struct in their own config with `#[serde(flatten)]`.

use serde::{Deserialize, Serialize};
use uuid::uuid;

use crate::display_attribute::{AttrColor, AttrKind, DisplayAttribute, LineStyle};
use crate::guid::Guid;

/// Default identifier of the input-text display attribute.
pub const GUID_INPUT_ATTRIBUTE: Guid = uuid!("0f4a3c51-7b2e-4d8a-9c61-2e5b8f7d1a30");

/// How composition text is decorated by the host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayAttributeStyle {
    /// Registered with the host on activation to obtain the atom.
    pub guid: Guid,
    pub description: String,
    /// 0xBBGGRR; `None` leaves the host default.
    pub text_color: Option<u32>,
    pub background_color: Option<u32>,
    pub line_color: Option<u32>,
    pub line_style: LineStyle,
    pub bold_line: bool,
}

impl Default for DisplayAttributeStyle {
    fn default() -> Self {
        Self {
            guid: GUID_INPUT_ATTRIBUTE,
            description: "Composition input".to_string(),
            text_color: None,
            background_color: None,
            line_color: None,
            line_style: LineStyle::Dot,
            bold_line: false,
        }
    }
}

impl DisplayAttributeStyle {
    pub fn to_attribute(&self) -> DisplayAttribute {
        let color = |value: Option<u32>| value.map_or(AttrColor::None, AttrColor::Rgb);
        DisplayAttribute {
            text_color: color(self.text_color),
            background_color: color(self.background_color),
            line_color: color(self.line_color),
            line_style: self.line_style,
            bold_line: self.bold_line,
            kind: AttrKind::Input,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Open the keyboard on activation when the host reports it closed.
    /// Some hosts start every new thread with the keyboard closed.
    pub force_keyboard_open: bool,

    /// Refuse to edit the composition while the caret is outside it.
    pub reject_outside_insertion: bool,

    /// End the composition when an edit moves the selection out of it.
    pub end_composition_on_edit_outside: bool,

    /// Decoration applied to composition text.
    pub input_attribute: DisplayAttributeStyle,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            force_keyboard_open: true,
            reject_outside_insertion: true,
            end_composition_on_edit_outside: true,
            input_attribute: DisplayAttributeStyle::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_toml<P: AsRef<std::path::Path>>(
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml<P: AsRef<std::path::Path>>(
        &self,
        path: P,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize configuration to TOML string.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.force_keyboard_open);
        assert!(config.reject_outside_insertion);
        assert!(config.end_composition_on_edit_outside);
        assert_eq!(config.input_attribute.guid, GUID_INPUT_ATTRIBUTE);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            force_keyboard_open = false

            [input_attribute]
            line_style = "squiggle"
            text_color = 255
            "#,
        )
        .expect("valid toml");
        assert!(!config.force_keyboard_open);
        assert!(config.reject_outside_insertion);
        assert_eq!(config.input_attribute.line_style, LineStyle::Squiggle);
        assert_eq!(config.input_attribute.text_color, Some(255));
        assert_eq!(config.input_attribute.guid, GUID_INPUT_ATTRIBUTE);
    }

    #[test]
    fn test_toml_string_reloads() {
        let mut config = Config::default();
        config.end_composition_on_edit_outside = false;
        config.input_attribute.bold_line = true;
        let text = config.to_toml_string().expect("serializes");
        assert_eq!(Config::from_toml_str(&text).expect("parses"), config);
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("libime-config-{}.toml", std::process::id()));
        let config = Config {
            force_keyboard_open: false,
            ..Config::default()
        };
        config.save_toml(&path).expect("saves");
        let loaded = Config::load_toml(&path).expect("loads");
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_style_to_attribute() {
        let style = DisplayAttributeStyle {
            text_color: Some(0x0000ff),
            ..DisplayAttributeStyle::default()
        };
        let attribute = style.to_attribute();
        assert_eq!(attribute.text_color, AttrColor::Rgb(0x0000ff));
        assert_eq!(attribute.background_color, AttrColor::None);
        assert_eq!(attribute.kind, AttrKind::Input);
    }
}
