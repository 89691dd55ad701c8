//! proxadmm-core
//!
//! This library provides a linear operator algebra and an ADMM solver for
//! regularized linear inverse problems of the form
//!
//! ```text
//! min_x f(x) + sum_i g_i(C_i x)
//! ```
//!
//! where `f` is a smooth data-fidelity term and each `g_i` is a penalty with
//! a proximal operator.
//!
//! # Functionality
//!
//! - Flat and blocked arrays with real and complex element types
//! - Linear operators with checked shapes, composition, algebra and adjoints
//! - Functionals with closed-form proximal operators
//! - ADMM with pluggable x-update strategies and iteration statistics
//! - Opaque denoiser boundary for plug-and-play priors
//! - Timing and logging
//!
//! # Example
//!
//! ```rust
//! use proxadmm_core::prelude::*;
//! use std::sync::Arc;
//!
//! let y = Array::from_vec(vec![0.0, 0.0, 1.0, 1.0, 0.9]);
//! let f = SquaredL2Loss::new(y, linop::identity(Shape::from(5))).unwrap();
//! let d = linop::finite_difference(&[5], None, Boundary::Truncate).unwrap();
//! let g = ScaledFunctional::<f64>::new(0.05, Arc::new(L1Norm)).unwrap();
//!
//! let problem = ADMMProblem {
//!     f: Arc::new(f),
//!     g_list: vec![Arc::new(g)],
//!     c_list: vec![d],
//!     rho_list: vec![0.5],
//!     x0: Array::zeros(&Shape::from(5)),
//! };
//! let mut solver = ADMMSolver::new(
//!     problem,
//!     ADMMConfig::default(),
//!     Box::new(LinearSubproblemSolver::<f64>::default()),
//! )
//! .unwrap();
//! let x = solver.solve().unwrap();
//! assert_eq!(x.shape(), Shape::from(5));
//! ```

/// Flat and blocked arrays and their shapes
pub mod array;

/// Conjugate gradient
pub mod cg;

/// Opaque denoiser boundary
pub mod denoiser;

/// Element types and dtype promotion
pub mod dtype;

/// Error types
pub mod error;

/// Functionals and proximal operators
pub mod functional;

/// Iteration statistics
pub mod history;

/// Linear operators and their algebra
pub mod linop;

/// Squared-error data fidelity
pub mod loss;

/// Base operator trait and nonlinear maps
pub mod operator;

/// Problem formulation and solving
pub mod problem;

/// Strategies for the ADMM x-update
pub mod subproblem;

/// Timing and logging utilities
pub mod timing;

/// Reference solvers for validating ADMM results
pub mod utils;

/// Commonly used types.
pub mod prelude {
    pub use crate::array::{Array, Shape};
    pub use crate::cg::{CgInfo, CgOptions};
    pub use crate::dtype::{DType, RealScalar, Scalar};
    pub use crate::error::ADMMError;
    pub use crate::functional::{
        Functional, FunctionalExt, L1Norm, L21Norm, NonNegativeIndicator, ScaledFunctional,
        SquaredL2Norm, ZeroFunctional,
    };
    pub use crate::linop::{self, Boundary, LinearOperator};
    pub use crate::loss::SquaredL2Loss;
    pub use crate::operator::Operator;
    pub use crate::problem::{ADMMConfig, ADMMProblem, ADMMSolver, ItstatOptions, SolverState};
    pub use crate::subproblem::{GenericSubproblemSolver, LinearSubproblemSolver, SubproblemSolver};
}
