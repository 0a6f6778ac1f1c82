//! Strict / lenient switch shared by every codec.
//!
//! Lenient mode mirrors what existing tools tolerate in the wild: partially
//! written index files and chunk containers with trailing garbage still
//! decode.  Strict mode turns every such tolerance into a typed error.
//!
//! | Codec   | Lenient                                   | Strict                              |
//! |---------|-------------------------------------------|-------------------------------------|
//! | index   | drops a final partial entry               | `TruncatedEntry`                    |
//! | index   | ignores bytes after `chunk_count` entries | `TrailingBytes`                     |
//! | index   | encode rewrites `chunk_count`             | encode refuses inconsistent headers |
//! | chunk   | ignores bytes after the payload           | `TrailingBytes`                     |
//! | archive | ignores record padding and trailing bytes | rejects both                        |

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Lenient,
    Strict,
}

impl Mode {
    #[inline]
    pub fn is_strict(self) -> bool {
        self == Mode::Strict
    }
}
