//! Typed model of the host interpreter's descriptor JSON.
//!
//! The schema (underscore-prefixed keys, ordinal selectors, unit-tagged
//! numbers) belongs to the host. This module only builds conforming shapes
//! for the three instructions the flows submit: place-by-token, percentage
//! transform, and make-text-layer.

use serde::{Deserialize, Serialize};

use crate::domain::{Justification, Orientation, SessionToken};

/// How the host should schedule a submitted batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Apply immediately within the current modal scope.
    #[default]
    Execute,
    /// Queue until the host is free to modify state.
    Wait,
    /// Reject instead of queueing when the host is busy.
    Fail,
}

/// One entry in a descriptor's `_target` reference list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRef {
    #[serde(rename = "_ref")]
    pub class: String,
    #[serde(rename = "_enum", default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(rename = "_value", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl TargetRef {
    /// Selects whichever instance of `class` is currently active in the host.
    pub fn ordinal(class: &str) -> Self {
        Self {
            class: class.to_string(),
            selector: Some("ordinal".to_string()),
            value: Some("targetEnum".to_string()),
        }
    }

    /// Bare class reference, used when creating a new instance of `class`.
    pub fn class(class: &str) -> Self {
        Self {
            class: class.to_string(),
            selector: None,
            value: None,
        }
    }
}

/// A measurement tagged with the host's unit system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitValue {
    #[serde(rename = "_unit")]
    pub unit: Unit,
    #[serde(rename = "_value")]
    pub value: f64,
}

impl UnitValue {
    pub fn percent(value: f64) -> Self {
        Self {
            unit: Unit::Percent,
            value,
        }
    }

    pub fn points(value: f64) -> Self {
        Self {
            unit: Unit::Points,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "percentUnit")]
    Percent,
    #[serde(rename = "pointsUnit")]
    Points,
}

/// A value drawn from one of the host's named enum families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValue {
    #[serde(rename = "_enum")]
    pub family: String,
    #[serde(rename = "_value")]
    pub value: String,
}

impl EnumValue {
    pub fn justification(justification: Justification) -> Self {
        Self {
            family: "justification".to_string(),
            value: justification.as_str().to_string(),
        }
    }

    pub fn orientation(orientation: Orientation) -> Self {
        Self {
            family: "orientation".to_string(),
            value: orientation.as_str().to_string(),
        }
    }
}

/// File reference consumed by a placement instruction. `_kind: "local"`
/// tells the host the token resolves to a file on its own machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceSource {
    #[serde(rename = "_path")]
    pub token: SessionToken,
    #[serde(rename = "_kind")]
    pub kind: String,
}

impl PlaceSource {
    pub fn local(token: SessionToken) -> Self {
        Self {
            token,
            kind: "local".to_string(),
        }
    }
}

/// Anchor point for newly created text, in document coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextClickPoint {
    #[serde(rename = "_obj")]
    pub obj: String,
    pub horizontal: f64,
    pub vertical: f64,
}

impl TextClickPoint {
    pub fn offset(horizontal: f64, vertical: f64) -> Self {
        Self {
            obj: "offset".to_string(),
            horizontal,
            vertical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextShape {
    #[serde(rename = "_obj")]
    pub obj: String,
    pub orientation: EnumValue,
}

impl TextShape {
    pub fn oriented(orientation: Orientation) -> Self {
        Self {
            obj: "textShape".to_string(),
            orientation: EnumValue::orientation(orientation),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RgbColor {
    #[serde(rename = "_obj")]
    pub obj: String,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl RgbColor {
    pub fn new(red: u8, green: u8, blue: u8) -> Self {
        Self {
            obj: "RGBColor".to_string(),
            red,
            green,
            blue,
        }
    }

    pub fn black() -> Self {
        Self::new(0, 0, 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextStyle {
    #[serde(rename = "_obj")]
    pub obj: String,
    pub size: UnitValue,
    pub color: RgbColor,
}

/// Character styling applied to the half-open range `[from, to)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextStyleRange {
    #[serde(rename = "_obj")]
    pub obj: String,
    pub from: u32,
    pub to: u32,
    #[serde(rename = "textStyle")]
    pub style: TextStyle,
}

impl TextStyleRange {
    pub fn new(from: u32, to: u32, size_points: f64, color: RgbColor) -> Self {
        Self {
            obj: "textStyleRange".to_string(),
            from,
            to,
            style: TextStyle {
                obj: "textStyle".to_string(),
                size: UnitValue::points(size_points),
                color,
            },
        }
    }
}

/// The `using` payload of a make-text-layer instruction. Everything the
/// host needs to materialize the layer travels in this one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLayerSpec {
    #[serde(rename = "_obj")]
    pub obj: String,
    #[serde(rename = "textKey")]
    pub text: String,
    #[serde(rename = "textClickPoint")]
    pub click_point: TextClickPoint,
    pub justification: EnumValue,
    #[serde(rename = "textShape")]
    pub shapes: Vec<TextShape>,
    #[serde(rename = "textStyleRange")]
    pub style_ranges: Vec<TextStyleRange>,
}

impl TextLayerSpec {
    pub fn new(
        text: impl Into<String>,
        click_point: TextClickPoint,
        justification: Justification,
        orientation: Orientation,
    ) -> Self {
        Self {
            obj: "textLayer".to_string(),
            text: text.into(),
            click_point,
            justification: EnumValue::justification(justification),
            shapes: vec![TextShape::oriented(orientation)],
            style_ranges: Vec::new(),
        }
    }

    pub fn with_style_range(mut self, range: TextStyleRange) -> Self {
        self.style_ranges.push(range);
        self
    }
}

/// One host instruction: the `_obj` marker picks the event or class, the
/// `_target` list selects what it applies to, and the remaining fields are
/// its parameter object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_obj")]
pub enum CommandDescriptor {
    #[serde(rename = "placeEvent")]
    PlaceEvent {
        #[serde(rename = "_target")]
        target: Vec<TargetRef>,
        #[serde(rename = "null")]
        source: PlaceSource,
    },
    #[serde(rename = "transform")]
    Transform {
        #[serde(rename = "_target")]
        target: Vec<TargetRef>,
        width: UnitValue,
        height: UnitValue,
    },
    #[serde(rename = "make")]
    Make {
        #[serde(rename = "_target")]
        target: Vec<TargetRef>,
        using: TextLayerSpec,
    },
}

impl CommandDescriptor {
    /// Place a staged file into the active document as a new layer.
    pub fn place_in_active_document(token: SessionToken) -> Self {
        CommandDescriptor::PlaceEvent {
            target: vec![TargetRef::ordinal("document")],
            source: PlaceSource::local(token),
        }
    }

    /// Scale the active layer by percentages.
    ///
    /// Targets the layer ordinally, which assumes the layer to resize is
    /// still the active one. That holds right after a placement in the same
    /// scope, and is all the interpreter offers: a placement result carries
    /// no identity for the layer it created.
    pub fn scale_active_layer(width_percent: f64, height_percent: f64) -> Self {
        CommandDescriptor::Transform {
            target: vec![TargetRef::ordinal("layer")],
            width: UnitValue::percent(width_percent),
            height: UnitValue::percent(height_percent),
        }
    }

    /// Create a styled text layer in one instruction.
    pub fn make_text_layer(spec: TextLayerSpec) -> Self {
        CommandDescriptor::Make {
            target: vec![TargetRef::class("textLayer")],
            using: spec,
        }
    }
}

/// Ordered descriptors applied together under one execution mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandBatch {
    pub commands: Vec<CommandDescriptor>,
    #[serde(rename = "modalBehavior")]
    pub mode: ExecutionMode,
}

impl CommandBatch {
    /// Batch applied immediately, the only mode the insertion flows use.
    pub fn execute(commands: Vec<CommandDescriptor>) -> Self {
        Self {
            commands,
            mode: ExecutionMode::Execute,
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
