//! Block variant catalog.
//!
//! Variants are immutable descriptors loaded with the configuration. The
//! catalog never changes after load; the selector only reads from it.

use serde::{Deserialize, Serialize};

/// RGBA color representation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    pub const WHITE: Color = Color::rgb(255, 255, 255);
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Axis-aligned size of a block in world units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Footprint {
    pub width: f32,
    pub height: f32,
}

impl Footprint {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn half_width(&self) -> f32 {
        self.width * 0.5
    }

    pub fn half_height(&self) -> f32 {
        self.height * 0.5
    }
}

impl Default for Footprint {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

/// Configured block type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockVariant {
    pub name: String,
    #[serde(default)]
    pub footprint: Footprint,
    /// Relative spawn weight. Higher weight = more likely to spawn.
    #[serde(default = "default_spawn_weight")]
    pub spawn_weight: f32,
    /// Points credited when a block of this variant lands.
    #[serde(default = "default_points")]
    pub points: u32,
    /// Minimum score before the variant can be drawn.
    #[serde(default)]
    pub unlock_score: u32,
    #[serde(default)]
    pub color: Color,
    #[serde(default = "default_friction")]
    pub friction: f32,
    #[serde(default = "default_density")]
    pub density: f32,
}

fn default_spawn_weight() -> f32 {
    1.0
}

fn default_points() -> u32 {
    1
}

fn default_friction() -> f32 {
    0.8
}

fn default_density() -> f32 {
    1.0
}

impl BlockVariant {
    /// Creates a variant with default color and material.
    pub fn new(name: impl Into<String>, footprint: Footprint, spawn_weight: f32, points: u32) -> Self {
        Self {
            name: name.into(),
            footprint,
            spawn_weight,
            points,
            unlock_score: 0,
            color: Color::default(),
            friction: default_friction(),
            density: default_density(),
        }
    }

    /// Sets the score at which the variant becomes eligible.
    #[must_use]
    pub fn unlocked_at(mut self, score: u32) -> Self {
        self.unlock_score = score;
        self
    }

    pub fn is_eligible(&self, score: u32) -> bool {
        score >= self.unlock_score
    }
}

/// Ordered list of variants.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct VariantCatalog {
    variants: Vec<BlockVariant>,
}

impl VariantCatalog {
    pub fn new(variants: Vec<BlockVariant>) -> Self {
        Self { variants }
    }

    pub fn variants(&self) -> &[BlockVariant] {
        &self.variants
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn first(&self) -> Option<&BlockVariant> {
        self.variants.first()
    }

    /// Looks a variant up by name.
    pub fn by_name(&self, name: &str) -> Option<&BlockVariant> {
        self.variants.iter().find(|v| v.name == name)
    }

    /// Variants eligible at the given score, in catalog order.
    pub fn eligible(&self, score: u32) -> Vec<&BlockVariant> {
        self.variants.iter().filter(|v| v.is_eligible(score)).collect()
    }
}
