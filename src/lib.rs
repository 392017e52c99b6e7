//! # optdoc
//!
//! Builds option reference manuals from module option exports. Each module
//! set's option tree is normalized into a canonical, ordered record list,
//! exported as JSON and rendered into a DocBook fragment; the fragments are
//! combined with hand-authored documents and rendered to chunked HTML and man
//! pages with every cross-reference resolved.
//!
//! # Architecture: Two Halves, One Barrier
//!
//! ```text
//! 1. Normalize   options.json  →  Vec<OptionDoc>           (per module set, parallel)
//! 2. Export      Vec<OptionDoc> →  options/<id>.json
//!    Fragment    Vec<OptionDoc> →  <id>.xml                 (cached)
//!    ─────────── barrier: every fragment is rendered ───────────
//! 3. Combine     docs/ + fragments → book and reference trees
//! 4. Targets     trees → TargetDatabase
//! 5. Render      trees + targets → HTML pages ∥ man pages
//! ```
//!
//! The option half works on plain values: the module evaluator's output is
//! read as JSON and never re-evaluated. The document half is a typestate
//! chain in [`pipeline`]; a renderer only ever sees trees that were combined,
//! validated and indexed.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`normalize`] | Stage 1: filtering, scrubbing, path stripping, ordering, uniqueness |
//! | [`value`] | Raw option values and function scrubbing |
//! | [`packages`] | Related-package specifications and the package repository |
//! | [`markdown`] | Markdown descriptions to DocBook |
//! | [`export`] | Stage 2: canonical JSON export |
//! | [`fragment`] | Stage 2: DocBook fragment per module set |
//! | [`cache`] | Content-addressed fragment cache |
//! | [`xml`] | Positioned XML element trees |
//! | [`combine`] | Stage 3: overlay, `xi:include` resolution, identifier checks |
//! | [`schema`] | Structural schema of the supported DocBook subset |
//! | [`targets`] | Stage 4: cross-reference target database |
//! | [`html`] | Stage 5: chunked HTML rendering using Maud |
//! | [`man`] | Stage 5: roff man pages |
//! | [`pipeline`] | Phase types and the CLI commands |
//! | [`config`] | `optdoc.toml` loading, validation and merging |
//! | [`types`] | Normalized records shared between stages (`OptionDoc`) |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Deterministic Output
//!
//! Normalized lists are totally ordered and every renderer is a pure function
//! of its input, so the same options always give byte-identical JSON,
//! fragments and pages. The fragment cache keys on that: a fragment is
//! reused when the canonical JSON and the fragment parameters hash the same.
//!
//! ## No Partial Output
//!
//! Every phase runs in memory. Files are written to the output directory only
//! after rendering succeeded, so a conflict, a schema violation or a dangling
//! reference leaves the previous output untouched.
//!
//! ## Maud Over Template Engines
//!
//! HTML is generated with [Maud](https://maud.lambda.xyz/), a compile-time
//! HTML macro system. All interpolation is escaped, so option descriptions
//! cannot break out of their markup.

pub mod cache;
pub mod combine;
pub mod config;
pub mod export;
pub mod fragment;
pub mod html;
pub mod man;
pub mod markdown;
pub mod normalize;
pub mod output;
pub mod packages;
pub mod pipeline;
pub mod schema;
pub mod targets;
pub mod types;
pub mod value;
pub mod xml;

#[cfg(test)]
pub(crate) mod test_helpers;
