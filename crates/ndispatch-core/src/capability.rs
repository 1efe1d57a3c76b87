//! Capability tags and the once-per-process capability prober.
//!
//! A [`CapabilityTag`] is one rung on a totally ordered ladder of hardware
//! support. The CPU itself is queried once per process through
//! [`host_capability`]. A [`Prober`] turns a source of tags into a memoized
//! answer capped at that host capability; a source that cannot tell degrades
//! to [`CapabilityTag::Default`] instead of failing.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::DispatchError;

/// Environment variable that caps the process-wide capability.
pub const CAPABILITY_ENV: &str = "NDISPATCH_CPU_CAPABILITY";

/// Hardware capability level, ordered from least to most capable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityTag {
    /// Portable baseline, runs everywhere
    #[serde(alias = "baseline", alias = "scalar")]
    Default,
    /// AVX2 + FMA (256-bit)
    Avx2,
    /// AVX-512 F/BW/VL/DQ + FMA (512-bit)
    Avx512,
}

impl CapabilityTag {
    /// All tags, least capable first.
    pub const ALL: [CapabilityTag; 3] = [Self::Default, Self::Avx2, Self::Avx512];

    /// The tag every operation must provide.
    pub const BASELINE: CapabilityTag = Self::Default;

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Avx2 => "avx2",
            Self::Avx512 => "avx512",
        }
    }

    /// Vector register width in bits that kernels at this tier assume.
    pub fn vector_bits(&self) -> usize {
        match self {
            Self::Default => 0,
            Self::Avx2 => 256,
            Self::Avx512 => 512,
        }
    }
}

impl Default for CapabilityTag {
    fn default() -> Self {
        Self::BASELINE
    }
}

impl fmt::Display for CapabilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityTag {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" | "baseline" | "scalar" => Ok(Self::Default),
            "avx2" => Ok(Self::Avx2),
            "avx512" => Ok(Self::Avx512),
            _ => Err(DispatchError::UnknownCapability(s.to_string())),
        }
    }
}

/// A capability source reports the highest tag the environment supports, or
/// `None` when it cannot tell.
pub type ProbeFn = fn() -> Option<CapabilityTag>;

#[cfg(test)]
static CPU_QUERIES: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn cpu_features() -> Option<CapabilityTag> {
    #[cfg(test)]
    CPU_QUERIES.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx512f")
            && is_x86_feature_detected!("avx512bw")
            && is_x86_feature_detected!("avx512vl")
            && is_x86_feature_detected!("avx512dq")
            && is_x86_feature_detected!("fma")
        {
            return Some(CapabilityTag::Avx512);
        }
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return Some(CapabilityTag::Avx2);
        }
        Some(CapabilityTag::Default)
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        None
    }
}

static HOST: OnceLock<Option<CapabilityTag>> = OnceLock::new();

/// Highest capability the executing CPU supports.
///
/// The CPU is queried once per process; every prober reads this cached
/// answer. `None` on architectures without runtime feature detection.
pub fn host_capability() -> Option<CapabilityTag> {
    *HOST.get_or_init(cpu_features)
}

/// The most a prober may ever report on this host.
fn host_limit() -> CapabilityTag {
    host_capability().unwrap_or(CapabilityTag::BASELINE)
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Query(ProbeFn),
    Pinned(CapabilityTag),
}

/// Memoizing capability prober.
///
/// Whatever its source reports, a prober never answers above
/// [`host_capability`], so a stub cannot pick a kernel the CPU cannot run.
#[derive(Debug)]
pub struct Prober {
    source: Source,
    ceiling: Option<CapabilityTag>,
    detected: OnceLock<CapabilityTag>,
}

impl Prober {
    /// Create a prober over an arbitrary capability source.
    pub const fn new(source: ProbeFn) -> Self {
        Self {
            source: Source::Query(source),
            ceiling: None,
            detected: OnceLock::new(),
        }
    }

    /// Create a prober for the executing CPU.
    pub const fn host() -> Self {
        Self::new(host_capability)
    }

    /// Create a prober that reports `tag`, or the host capability when the
    /// host supports less.
    pub const fn fixed(tag: CapabilityTag) -> Self {
        Self {
            source: Source::Pinned(tag),
            ceiling: None,
            detected: OnceLock::new(),
        }
    }

    /// Cap the detected tag. A ceiling never raises the result.
    pub fn with_ceiling(mut self, ceiling: Option<CapabilityTag>) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// The configured ceiling, if any.
    pub fn ceiling(&self) -> Option<CapabilityTag> {
        self.ceiling
    }

    /// Whether detection has already run.
    pub fn is_detected(&self) -> bool {
        self.detected.get().is_some()
    }

    /// Highest capability the environment supports, queried once and capped
    /// by the ceiling.
    pub fn detect(&self) -> CapabilityTag {
        let supported = *self.detected.get_or_init(|| self.query());
        match self.ceiling {
            Some(ceiling) if ceiling < supported => ceiling,
            _ => supported,
        }
    }

    fn query(&self) -> CapabilityTag {
        let reported = match self.source {
            Source::Pinned(tag) => tag,
            Source::Query(source) => source().unwrap_or_else(|| {
                warn!(
                    fallback = %CapabilityTag::BASELINE,
                    "capability detection unavailable, using baseline"
                );
                CapabilityTag::BASELINE
            }),
        };

        let limit = host_limit();
        let supported = if reported > limit {
            warn!(
                reported = %reported,
                host = %limit,
                "reported capability exceeds the host, capping"
            );
            limit
        } else {
            reported
        };

        if let Some(ceiling) = self.ceiling.filter(|c| *c < supported) {
            info!(
                detected = %supported,
                ceiling = %ceiling,
                "capability capped by configuration"
            );
        }
        debug!(capability = %supported, "CPU capability detected");
        supported
    }
}

impl Default for Prober {
    fn default() -> Self {
        Self::host()
    }
}

static GLOBAL_PROBER: OnceLock<Arc<Prober>> = OnceLock::new();

/// Parse a capability override such as the value of [`CAPABILITY_ENV`].
///
/// A blank value means no ceiling. Callers log and ignore an `Err`, so a
/// bad override never keeps the process from dispatching.
pub fn parse_override(raw: &str) -> Result<Option<CapabilityTag>, DispatchError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    raw.parse().map(Some)
}

/// Read the capability ceiling from [`CAPABILITY_ENV`].
///
/// Unset or empty means no ceiling. Unknown names are logged and ignored.
pub fn ceiling_from_env() -> Option<CapabilityTag> {
    let raw = std::env::var(CAPABILITY_ENV).ok()?;
    parse_override(&raw).unwrap_or_else(|e| {
        warn!(variable = CAPABILITY_ENV, error = %e, "ignoring capability override");
        None
    })
}

/// The process-wide host prober, capped by [`CAPABILITY_ENV`].
pub fn global_prober() -> &'static Arc<Prober> {
    GLOBAL_PROBER.get_or_init(|| Arc::new(Prober::host().with_ceiling(ceiling_from_env())))
}

/// Highest capability of this process.
#[inline]
pub fn detect() -> CapabilityTag {
    global_prober().detect()
}
