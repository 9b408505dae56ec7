use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box in pixel coordinates.
///
/// Serialized as a `[x1, y1, x2, y2]` array to match the on-disk anchor and
/// gallery formats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    /// Left edge x-coordinate
    pub x1: f32,
    /// Top edge y-coordinate
    pub y1: f32,
    /// Right edge x-coordinate
    pub x2: f32,
    /// Bottom edge y-coordinate
    pub y2: f32,
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        Self {
            x1: v[0],
            y1: v[1],
            x2: v[2],
            y2: v[3],
        }
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl JsonSchema for BBox {
    fn schema_name() -> String {
        "BBox".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        <[f32; 4]>::json_schema(gen)
    }
}

impl BBox {
    /// Create a new bounding box.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box width in pixels.
    #[inline]
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    /// Box height in pixels.
    #[inline]
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Box area in pixels.
    #[inline]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Center point of the box.
    #[inline]
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Height-over-width ratio. Players are taller than wide (> 1.3),
    /// balls are roughly square (0.8–1.2). Returns 0 for degenerate boxes.
    pub fn aspect_ratio(&self) -> f32 {
        let w = self.width();
        if w > 0.0 {
            self.height() / w
        } else {
            0.0
        }
    }

    /// Check that the box has positive extent on both axes.
    pub fn is_valid(&self) -> bool {
        self.x2 > self.x1 && self.y2 > self.y1
    }

    /// Compute Intersection over Union with another box.
    pub fn iou(&self, other: &BBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Euclidean distance between box centers.
    pub fn center_distance(&self, other: &BBox) -> f32 {
        let (cx1, cy1) = self.center();
        let (cx2, cy2) = other.center();
        ((cx1 - cx2).powi(2) + (cy1 - cy2).powi(2)).sqrt()
    }

    /// Return a new box grown by `ratio` of its size on each side.
    ///
    /// The result is clamped to non-negative coordinates, and to
    /// `bounds = (frame_width, frame_height)` when provided.
    pub fn expand(&self, ratio: f32, bounds: Option<(f32, f32)>) -> BBox {
        let dx = self.width() * ratio;
        let dy = self.height() * ratio;

        let mut expanded = BBox {
            x1: (self.x1 - dx).max(0.0),
            y1: (self.y1 - dy).max(0.0),
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        };

        if let Some((fw, fh)) = bounds {
            expanded.x2 = expanded.x2.min(fw);
            expanded.y2 = expanded.y2.min(fh);
        }

        expanded
    }
}
