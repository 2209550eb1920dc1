//! Effect summaries for external library functions.
//!
//! Calls into code the analysis cannot see are modeled by per-function
//! summaries expressed in the same primitive constraints the rest of the
//! program lowers to. A call to an external with no summary is recovered
//! conservatively: the universal set flows into the return value and
//! through every pointer argument.

use crate::objects::ObjectId;
use std::collections::HashMap;

/// The modeled effect of one external function.
#[derive(Clone, Debug)]
pub enum Summary {
    /// Returns a fresh heap allocation of `fields` slots (`malloc`,
    /// `strdup`, ...).
    AllocRet {
        /// Field count of the summarized allocation.
        fields: u32,
    },
    /// Returns its `usize`th argument unchanged (`memset`).
    ReturnsArg(usize),
    /// Copies the pointed-to contents of argument `from` into the object
    /// behind argument `to`, and returns `to` (`memcpy`, `strcpy`, ...).
    Transfer {
        /// Destination argument position.
        to: usize,
        /// Source argument position.
        from: usize,
    },
    /// Returns the address of a library-internal static object
    /// (`__errno_location`, `setlocale`, the ctype tables).
    ReturnsStatic(ObjectId),
    /// Returns a pointer the analysis cannot bound (`getenv`).
    ReturnsUniversal,
    /// Returns the thread-specific slot's contents.
    PthreadGet,
    /// Stores its second argument into the thread-specific slot.
    PthreadSet,
    /// No pointer effects (`free`, the stdio printers).
    Noop,
}

/// The summary table, keyed by function name.
pub struct ExtLibInfo {
    summaries: HashMap<String, Summary>,
}

impl ExtLibInfo {
    /// An empty table: every external call takes the conservative path.
    pub fn empty() -> Self {
        Self {
            summaries: HashMap::new(),
        }
    }

    /// The table covering the common C library functions.
    pub fn with_defaults() -> Self {
        let mut info = Self::empty();

        for name in &["malloc", "calloc", "valloc", "strdup", "strndup"] {
            info.insert(name, Summary::AllocRet { fields: 1 });
        }
        for name in &["memcpy", "memmove", "strcpy", "strncpy", "strcat", "strncat"] {
            info.insert(name, Summary::Transfer { to: 0, from: 1 });
        }
        info.insert("memset", Summary::ReturnsArg(0));
        for name in &[
            "free", "printf", "fprintf", "puts", "fputs", "putchar", "fflush", "abort", "exit",
        ] {
            info.insert(name, Summary::Noop);
        }
        info.insert("__errno_location", Summary::ReturnsStatic(ObjectId::ERRNO_OBJECT));
        info.insert("setlocale", Summary::ReturnsStatic(ObjectId::LOCALE_OBJECT));
        for name in &["__ctype_b_loc", "__ctype_tolower_loc", "__ctype_toupper_loc"] {
            info.insert(name, Summary::ReturnsStatic(ObjectId::CTYPE_OBJECT));
        }
        info.insert("getenv", Summary::ReturnsUniversal);
        info.insert("strerror", Summary::ReturnsUniversal);
        info.insert("pthread_getspecific", Summary::PthreadGet);
        info.insert("pthread_setspecific", Summary::PthreadSet);

        info
    }

    /// Add or replace the summary for `name`.
    pub fn insert(&mut self, name: &str, summary: Summary) {
        self.summaries.insert(name.to_string(), summary);
    }

    /// The summary for `name`, if one is known.
    pub fn get(&self, name: &str) -> Option<&Summary> {
        self.summaries.get(name)
    }
}
