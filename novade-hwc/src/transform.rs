// This is novade-hwc/src/transform.rs
// Affine surface-to-output transforms and their classification into the
// discrete rotations the hardware layer interface understands.

use crate::geometry::Rect;

const EPS: f64 = 1e-6;

/// The four rotation buckets expressible on a hardware overlay layer.
///
/// A mirrored transform collapses into the plain bucket with the same
/// diagonal sign pattern; the layer interface models no separate mirror
/// axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
}

/// A 2D affine transform: `p' = M * p + t` with `M = [a b; c d]`.
///
/// Used for the accumulated surface-to-output mapping of a view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Transform::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn translation(dx: f64, dy: f64) -> Self {
        Transform {
            tx: dx,
            ty: dy,
            ..Transform::IDENTITY
        }
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Transform {
            a: sx,
            d: sy,
            ..Transform::IDENTITY
        }
    }

    /// The exact matrix of one of the four discrete rotations
    /// (clockwise, y-down screen coordinates).
    pub fn rotation(rotation: Rotation) -> Self {
        let (a, b, c, d) = match rotation {
            Rotation::Normal => (1.0, 0.0, 0.0, 1.0),
            Rotation::Rotate90 => (0.0, -1.0, 1.0, 0.0),
            Rotation::Rotate180 => (-1.0, 0.0, 0.0, -1.0),
            Rotation::Rotate270 => (0.0, 1.0, -1.0, 0.0),
        };
        Transform {
            a,
            b,
            c,
            d,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Composition: apply `self` first, then `next`.
    pub fn then(&self, next: &Transform) -> Transform {
        Transform {
            a: next.a * self.a + next.b * self.c,
            b: next.a * self.b + next.b * self.d,
            c: next.c * self.a + next.d * self.c,
            d: next.c * self.b + next.d * self.d,
            tx: next.a * self.tx + next.b * self.ty + next.tx,
            ty: next.c * self.tx + next.d * self.ty + next.ty,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.b * y + self.tx,
            self.c * x + self.d * y + self.ty,
        )
    }

    /// Inverse transform, `None` for a degenerate matrix.
    pub fn invert(&self) -> Option<Transform> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < EPS {
            return None;
        }
        let inv_det = 1.0 / det;
        let a = self.d * inv_det;
        let b = -self.b * inv_det;
        let c = -self.c * inv_det;
        let d = self.a * inv_det;
        Some(Transform {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + b * self.ty),
            ty: -(c * self.tx + d * self.ty),
        })
    }

    /// Maps a rectangle and returns the integer bounding box of the image.
    pub fn map_rect(&self, rect: &Rect) -> Rect {
        let corners = [
            self.apply(rect.x as f64, rect.y as f64),
            self.apply(rect.right() as f64, rect.y as f64),
            self.apply(rect.x as f64, rect.bottom() as f64),
            self.apply(rect.right() as f64, rect.bottom() as f64),
        ];
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for (x, y) in corners {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        let x = min_x.floor() as i32;
        let y = min_y.floor() as i32;
        Rect::new(x, y, (max_x.ceil() as i32) - x, (max_y.ceil() as i32) - y)
    }

    /// Classifies the transform's 2x2 block into one of the four discrete
    /// rotation buckets by its sign/zero pattern.
    ///
    /// The classification is a pure function of the linear block and thus
    /// invariant under translation. Mirrored variants fold into the plain
    /// bucket sharing their sign pattern on the surviving axis. Any block
    /// with shear or a non-axis-aligned angle returns `None`, which routes
    /// the view to GPU composition.
    pub fn classify_rotation(&self) -> Option<Rotation> {
        let zero = |v: f64| v.abs() < EPS;
        if zero(self.b) && zero(self.c) && !zero(self.a) && !zero(self.d) {
            // Diagonal block: 0 or 180, mirror folded by the x axis sign.
            if self.a > 0.0 {
                Some(Rotation::Normal)
            } else {
                Some(Rotation::Rotate180)
            }
        } else if zero(self.a) && zero(self.d) && !zero(self.b) && !zero(self.c) {
            // Anti-diagonal block: 90 or 270, mirror folded by the c sign.
            if self.c > 0.0 {
                Some(Rotation::Rotate90)
            } else {
                Some(Rotation::Rotate270)
            }
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_of_exact_rotations() {
        for rotation in [
            Rotation::Normal,
            Rotation::Rotate90,
            Rotation::Rotate180,
            Rotation::Rotate270,
        ] {
            let t = Transform::rotation(rotation);
            assert_eq!(t.classify_rotation(), Some(rotation));
        }
    }

    #[test]
    fn test_classification_is_translation_invariant() {
        for rotation in [
            Rotation::Normal,
            Rotation::Rotate90,
            Rotation::Rotate180,
            Rotation::Rotate270,
        ] {
            let t = Transform::rotation(rotation).then(&Transform::translation(123.0, -7.5));
            assert_eq!(t.classify_rotation(), Some(rotation));
        }
    }

    #[test]
    fn test_mirrored_variants_fold_into_plain_buckets() {
        // Horizontal mirror: a < 0 on an otherwise diagonal block.
        let mirror_x = Transform {
            a: -1.0,
            d: 1.0,
            ..Transform::IDENTITY
        };
        assert_eq!(mirror_x.classify_rotation(), Some(Rotation::Rotate180));
        // Vertical mirror keeps a > 0 and folds into Normal.
        let mirror_y = Transform {
            a: 1.0,
            d: -1.0,
            ..Transform::IDENTITY
        };
        assert_eq!(mirror_y.classify_rotation(), Some(Rotation::Normal));
    }

    #[test]
    fn test_shear_and_free_angle_are_unclassifiable() {
        let shear = Transform {
            a: 1.0,
            b: 0.5,
            c: 0.0,
            d: 1.0,
            tx: 0.0,
            ty: 0.0,
        };
        assert_eq!(shear.classify_rotation(), None);
        let angle = 0.3f64;
        let rot = Transform {
            a: angle.cos(),
            b: -angle.sin(),
            c: angle.sin(),
            d: angle.cos(),
            tx: 0.0,
            ty: 0.0,
        };
        assert_eq!(rot.classify_rotation(), None);
    }

    #[test]
    fn test_invert_round_trips_points() {
        let t = Transform::rotation(Rotation::Rotate90).then(&Transform::translation(40.0, 10.0));
        let inv = t.invert().unwrap();
        let (x, y) = t.apply(3.0, 5.0);
        let (bx, by) = inv.apply(x, y);
        assert!((bx - 3.0).abs() < 1e-9);
        assert!((by - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_map_rect_under_translation() {
        let t = Transform::translation(10.0, 20.0);
        let r = t.map_rect(&Rect::new(1, 2, 30, 40));
        assert_eq!(r, Rect::new(11, 22, 30, 40));
    }

    #[test]
    fn test_degenerate_matrix_has_no_inverse() {
        let t = Transform {
            a: 1.0,
            b: 2.0,
            c: 2.0,
            d: 4.0,
            tx: 0.0,
            ty: 0.0,
        };
        assert!(t.invert().is_none());
    }
}
