//! Stage artifacts written between pipeline runs.
//!
//! # Submodules
//!
//! - [`json`]: Reads and writes article batches as pretty-printed JSON arrays
//!
//! # Output Structure
//!
//! ```text
//! data/
//! ├── raw_articles.json        # extract
//! ├── cleaned_articles.json    # clean
//! └── processed_articles.json  # process
//! ```
//!
//! Each stage reads its predecessor's file, so any stage can be re-run alone.

pub mod json;
