//! Schema Lineage
//!
//! Versioned schema histories with enforced compatibility rules and
//! translation of data between versions.
//!
//! ## Features
//!
//! - **Lineage Invariants**: Minor versions must accept all data of their
//!   predecessor; sequence bumps must be real breaking changes
//! - **Typed Diagnostics**: Validation failures classify as kind conflict,
//!   out of bounds, missing field or excess field
//! - **Lenses**: Implicit translation within a sequence, explicit lenses
//!   across sequences and backwards, with lacunas recording what was lost
//! - **Append-only Publication**: Republished lineages may only add history
//!
//! ## Architecture
//!
//! ```text
//! candidate JSON ──bind_lineage──> Lineage ──schema(v)──> Schema
//!                                                           │ validate
//!                                                           v
//!                 (Instance, [Lacuna]) <──translate(v)── Instance
//! ```
//!
//! ## Example
//!
//! ```
//! use schema_lineage::{bind_lineage, sv, BindOptions, Runtime};
//! use serde_json::json;
//!
//! let raw = json!({
//!     "name": "greeting",
//!     "schemas": [
//!         {"version": [0, 0], "schema": {"text": "string"}},
//!         {"version": [0, 1], "schema": {"text": "string", "loud": {"$type": "bool", "$default": false}}}
//!     ]
//! });
//! let lineage = bind_lineage(&raw, &Runtime::structural(), BindOptions::new()).unwrap();
//!
//! let inst = lineage.first().validate(&json!({"text": "hi"})).unwrap();
//! let (newer, lacunas) = inst.translate(sv(0, 1)).unwrap();
//! assert_eq!(newer.underlying(), &json!({"text": "hi", "loud": false}));
//! assert!(lacunas.is_empty());
//! ```

pub mod bind;
pub mod checksum;
pub mod compatibility;
pub mod config;
pub mod engine;
pub mod error;
pub mod instance;
pub mod lacuna;
pub mod lens;
pub mod lineage;
pub mod mux;
pub mod runtime;
pub mod validate;
pub mod version;

pub use bind::{bind_lineage, bind_lineage_at, BindOptions, FORCE_VERIFY_ENV};
pub use checksum::Checksum;
pub use compatibility::{append_only_report, is_append_only, AppendOnlyReport};
pub use config::LineageConfig;
pub use engine::{Constraint, ConstraintEngine, StructuralEngine};
pub use error::{
    AppendOnlyError, CodecError, DataError, ErrorKind, LineageError, MuxError, Result, TranslateError,
};
pub use instance::Instance;
pub use lacuna::{FieldRef, Lacuna, LacunaType};
pub use lens::{DeclarativeLens, FnLens, Hop, HopKind, ImplicitLens, Lens};
pub use lineage::{Lineage, Schema};
pub use runtime::Runtime;
pub use validate::{ValidationCode, ValidationError, ValidationFailure};
pub use version::{sv, SyntacticVersion};
