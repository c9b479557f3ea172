//! Unit direction on the sphere S^2.
//!
//! A [`UnitDirection`] is a 3-vector constrained to unit norm, used to
//! represent bearings, surface normals and directions-to-landmark in state
//! estimation. Its chart has tangent dimension 2: increments live in the
//! plane orthogonal to the direction, expressed in an orthonormal basis that
//! is derived from the point and memoized on first use.
//!
//! The representation is immutable by convention: every update goes through
//! [`UnitDirection::retract`], which maps a 2-vector of tangent coordinates
//! onto the sphere along a great circle, so the unit-norm invariant can
//! never drift through arithmetic.

use manifactor_core::error::{CoreError, Result};
use manifactor_core::Chart;
use nalgebra::{
    DVector, Matrix1x2, Matrix2, Matrix2x3, Matrix3, Matrix3x2, Matrix6x2, Vector2, Vector3,
};
use once_cell::sync::OnceCell;
use rand::Rng;
use rand_distr::{Distribution, UnitSphere};
use std::fmt;

/// Shared tolerance for the coincident and antipodal branches of
/// [`UnitDirection::local_coordinates`]. Keeping one constant for both
/// branches keeps retract and local-coordinates mutually consistent near
/// the poles of the chart.
pub const CHART_TOLERANCE: f64 = 1e-16;

/// A point on the unit sphere S^2, with a memoized tangent basis.
///
/// # Tangent space
///
/// The tangent plane at `p` is spanned by two orthonormal vectors `b1`, `b2`
/// orthogonal to `p`, returned by [`basis`](Self::basis). Tangent coordinates
/// `(v0, v1)` correspond to the ambient displacement `v0·b1 + v1·b2`.
///
/// # Chart laws
///
/// `retract` is the sphere exponential map and `local_coordinates` its
/// inverse, so the round-trip laws hold exactly for tangent vectors shorter
/// than π. The two degenerate configurations resolve by documented
/// convention rather than erroring:
///
/// - coincident points: `local_coordinates` returns the zero vector;
/// - antipodal points: `local_coordinates` returns `(π, 0)` — the true
///   tangent direction is undefined there and the first basis direction is
///   chosen arbitrarily.
#[derive(Clone, Debug)]
pub struct UnitDirection {
    /// Unit vector representation. Invariant: `p.norm() == 1` to tolerance.
    p: Vector3<f64>,
    /// Memoized tangent basis, published once per point.
    basis_cell: OnceCell<Matrix3x2<f64>>,
    /// Memoized 6x2 derivative of the stacked basis `[b1; b2]` wrt the point.
    basis_jacobian_cell: OnceCell<Matrix6x2<f64>>,
}

impl UnitDirection {
    /// Creates a direction by normalizing an unconstrained 3-vector.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidPoint`] if `v` has (numerically) zero length.
    pub fn new(v: Vector3<f64>) -> Result<Self> {
        Self::from_vector(v, None)
    }

    /// Creates a direction by normalizing an unconstrained 3-vector, with an
    /// optional derivative of the result with respect to the input.
    ///
    /// The Jacobian is the 2x3 derivative of the normalized output's tangent
    /// coordinates with respect to the ambient input: the normalization
    /// derivative `(I - n nᵀ)/‖v‖` projected through the tangent basis.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidPoint`] if `v` has (numerically) zero length.
    pub fn from_vector(v: Vector3<f64>, jacobian: Option<&mut Matrix2x3<f64>>) -> Result<Self> {
        let norm = v.norm();
        if norm < f64::EPSILON {
            return Err(CoreError::invalid_point(
                "cannot normalize a zero-length vector onto the sphere",
            ));
        }
        let direction = Self::from_unit_unchecked(v / norm);
        if let Some(h) = jacobian {
            let n = direction.p;
            let d_n_v = (Matrix3::identity() - n * n.transpose()) / norm;
            *h = direction.basis(None).transpose() * d_n_v;
        }
        Ok(direction)
    }

    /// Wraps a vector that is already unit length.
    ///
    /// The caller is responsible for the norm invariant; all public
    /// constructors go through normalization instead.
    pub(crate) fn from_unit_unchecked(p: Vector3<f64>) -> Self {
        Self {
            p,
            basis_cell: OnceCell::new(),
            basis_jacobian_cell: OnceCell::new(),
        }
    }

    /// Draws a direction uniformly from the sphere surface.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let [x, y, z]: [f64; 3] = UnitSphere.sample(rng);
        Self::from_unit_unchecked(Vector3::new(x, y, z))
    }

    /// Returns the ambient unit vector, with optional derivative with
    /// respect to the tangent coordinates (which is exactly the basis).
    pub fn unit_vector(&self, jacobian: Option<&mut Matrix3x2<f64>>) -> Vector3<f64> {
        if let Some(h) = jacobian {
            *h = *self.basis(None);
        }
        self.p
    }

    /// Returns the orthonormal tangent basis at this point, memoized.
    ///
    /// The basis is built from the world axis with the smallest projection
    /// onto the point (ties prefer x, then y, then z) to keep the cross
    /// products well conditioned: `b1 = normalize(p × axis)`, `b2 = p × b1`.
    ///
    /// When `jacobian` is given, the 6x2 derivative of the stacked basis
    /// `[b1; b2]` with respect to the point's tangent coordinates is computed
    /// (and memoized) as well; value-only calls never pay for it. Both cells
    /// publish once, so concurrent first use from several threads is safe
    /// and deterministic.
    pub fn basis(&self, jacobian: Option<&mut Matrix6x2<f64>>) -> &Matrix3x2<f64> {
        let b = self.basis_cell.get_or_init(|| Self::compute_basis(&self.p));
        if let Some(h) = jacobian {
            *h = *self
                .basis_jacobian_cell
                .get_or_init(|| Self::compute_basis_jacobian(&self.p, b));
        }
        b
    }

    /// Picks the world axis with the smallest projection onto `n`.
    fn tangent_axis(n: &Vector3<f64>) -> Vector3<f64> {
        let (mx, my, mz) = (n.x.abs(), n.y.abs(), n.z.abs());
        if mx <= my && mx <= mz {
            Vector3::x()
        } else if my <= mz {
            Vector3::y()
        } else {
            Vector3::z()
        }
    }

    fn compute_basis(n: &Vector3<f64>) -> Matrix3x2<f64> {
        let axis = Self::tangent_axis(n);
        let b1 = n.cross(&axis).normalize();
        // No need to normalize b2: n and b1 are orthonormal.
        let b2 = n.cross(&b1);
        Matrix3x2::from_columns(&[b1, b2])
    }

    /// Chain rule through `b1 = normalize(n × axis)` and `b2 = n × b1`,
    /// mapped into tangent coordinates via the basis itself.
    fn compute_basis_jacobian(n: &Vector3<f64>, b: &Matrix3x2<f64>) -> Matrix6x2<f64> {
        let axis = Self::tangent_axis(n);
        let big_b1 = n.cross(&axis);
        let b1 = b.column(0).into_owned();

        // d(n x axis)/dn and the normalization derivative.
        let d_big_b1_n = -skew(&axis);
        let d_b1_big_b1 = (Matrix3::identity() - b1 * b1.transpose()) / big_b1.norm();

        // d(n x b1)/dn and d(n x b1)/db1.
        let d_b2_n = -skew(&b1);
        let d_b2_b1 = skew(n);

        // The point's own chart derivative is the basis.
        let d_b1_p: Matrix3x2<f64> = d_b1_big_b1 * d_big_b1_n * b;
        let d_b2_p: Matrix3x2<f64> = d_b2_n * b + d_b2_b1 * d_b1_p;

        let mut stacked = Matrix6x2::zeros();
        stacked.fixed_view_mut::<3, 2>(0, 0).copy_from(&d_b1_p);
        stacked.fixed_view_mut::<3, 2>(3, 0).copy_from(&d_b2_p);
        stacked
    }

    /// Inner product with another direction, with optional derivatives with
    /// respect to each operand's tangent coordinates.
    pub fn dot(
        &self,
        q: &UnitDirection,
        h_p: Option<&mut Matrix1x2<f64>>,
        h_q: Option<&mut Matrix1x2<f64>>,
    ) -> f64 {
        let d = self.p.dot(&q.p);
        if let Some(h) = h_p {
            *h = q.p.transpose() * self.basis(None);
        }
        if let Some(h) = h_q {
            *h = self.p.transpose() * q.basis(None);
        }
        d
    }

    /// Projects `q` onto this point's tangent plane: `basisᵀ · q`.
    ///
    /// The optional Jacobian is with respect to `q`'s tangent coordinates.
    pub fn error(&self, q: &UnitDirection, h_q: Option<&mut Matrix2<f64>>) -> Vector2<f64> {
        let bt = self.basis(None).transpose();
        let xi = bt * q.p;
        if let Some(h) = h_q {
            *h = bt * q.basis(None);
        }
        xi
    }

    /// Same value as [`error`](Self::error), with Jacobians with respect to
    /// both operands' tangent coordinates.
    ///
    /// The derivative with respect to `self` goes through the basis
    /// derivative: each row of the error differentiates through its own
    /// basis column.
    pub fn error_vector(
        &self,
        q: &UnitDirection,
        h_p: Option<&mut Matrix2<f64>>,
        h_q: Option<&mut Matrix2<f64>>,
    ) -> Vector2<f64> {
        let need_basis_jacobian = h_p.is_some();
        let mut d_basis = Matrix6x2::zeros();
        let bt = self
            .basis(need_basis_jacobian.then_some(&mut d_basis))
            .transpose();
        let xi = bt * q.p;

        if let Some(h) = h_p {
            let d_b1_p = d_basis.fixed_view::<3, 2>(0, 0);
            let d_b2_p = d_basis.fixed_view::<3, 2>(3, 0);
            let row1 = q.p.transpose() * d_b1_p;
            let row2 = q.p.transpose() * d_b2_p;
            h.set_row(0, &row1);
            h.set_row(1, &row2);
        }
        if let Some(h) = h_q {
            *h = bt * q.basis(None);
        }
        xi
    }

    /// Angular distance to another direction, the norm of
    /// [`error`](Self::error).
    ///
    /// The optional Jacobian is with respect to `q`'s tangent coordinates.
    /// At coincident points the distance is not differentiable; the Jacobian
    /// falls back to zero there instead of dividing by zero.
    pub fn distance(&self, q: &UnitDirection, h_q: Option<&mut Matrix1x2<f64>>) -> f64 {
        let mut d_xi_q = Matrix2::zeros();
        let xi = self.error(q, h_q.is_some().then_some(&mut d_xi_q));
        let theta = xi.norm();
        if let Some(h) = h_q {
            if theta < CHART_TOLERANCE {
                *h = Matrix1x2::zeros();
            } else {
                *h = (xi.transpose() / theta) * d_xi_q;
            }
        }
        theta
    }

    /// Moves along the great circle given by tangent coordinates `v`.
    ///
    /// This is the sphere exponential map through the tangent basis:
    /// `ξ = v0·b1 + v1·b2`, `retract(v) = cos(‖ξ‖)·p + sin(‖ξ‖)·ξ/‖ξ‖`.
    ///
    /// A nonzero `v` whose ambient displacement `ξ` underflows to zero
    /// cannot be mapped; it falls back to the antipode rather than producing
    /// NaN. `retract(0)` returns the point unchanged.
    pub fn retract(&self, v: &Vector2<f64>) -> Self {
        let b = self.basis(None);
        let xi: Vector3<f64> = b.column(0) * v.x + b.column(1) * v.y;
        let theta = xi.norm();

        if theta == 0.0 {
            if v.norm() == 0.0 {
                return self.clone();
            }
            return Self::from_unit_unchecked(-self.p);
        }

        let moved = theta.cos() * self.p + theta.sin() * (xi / theta);
        Self::from_unit_unchecked(moved)
    }

    /// Tangent coordinates of `other` relative to this point.
    ///
    /// Inverse of [`retract`](Self::retract) away from the antipode:
    /// `θ = acos(p·q)`, mapped back through the basis. Coincident points
    /// yield the zero vector; antipodal points yield `(π, 0)` by convention
    /// (the direction is genuinely ambiguous there).
    pub fn local_coordinates(&self, other: &UnitDirection) -> Vector2<f64> {
        let c = self.p.dot(&other.p);

        if c > 1.0 - CHART_TOLERANCE {
            Vector2::zeros()
        } else if c < -1.0 + CHART_TOLERANCE {
            Vector2::new(std::f64::consts::PI, 0.0)
        } else {
            let theta = c.acos();
            let r = (theta / theta.sin()) * (other.p - self.p * c);
            self.basis(None).transpose() * r
        }
    }
}

/// Skew-symmetric matrix of `v`, so that `skew(v) * w == v × w`.
fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

impl Chart for UnitDirection {
    fn dimension(&self) -> usize {
        2
    }

    fn retract(&self, v: &DVector<f64>) -> Self {
        assert_eq!(v.len(), 2, "tangent vector for a unit direction has length 2");
        UnitDirection::retract(self, &Vector2::new(v[0], v[1]))
    }

    fn local_coordinates(&self, other: &Self) -> DVector<f64> {
        let v = UnitDirection::local_coordinates(self, other);
        DVector::from_column_slice(v.as_slice())
    }
}

impl PartialEq for UnitDirection {
    fn eq(&self, other: &Self) -> bool {
        self.p == other.p
    }
}

impl fmt::Display for UnitDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.p.x, self.p.y, self.p.z)
    }
}
