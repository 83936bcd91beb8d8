//! CreateTXG ranges
//!
//! A range bounds the creation order (transaction group) of the markers a
//! query returns. Each side is optional and independently inclusive or
//! exclusive. Exclusive bounds are normalized to inclusive ones before use:
//! `(b` becomes `[b+1` and `b)` becomes `b-1]`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::allow_createtxg_zero;
use crate::error::AbstractionError;

/// One side of a [`CreateTxgRange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTxgRangeBound {
    pub create_txg: u64,
    pub inclusive: bool,
}

impl CreateTxgRangeBound {
    pub const fn inclusive(create_txg: u64) -> Self {
        Self {
            create_txg,
            inclusive: true,
        }
    }

    pub const fn exclusive(create_txg: u64) -> Self {
        Self {
            create_txg,
            inclusive: false,
        }
    }

    fn validate(&self, bound: &'static str) -> Result<(), AbstractionError> {
        if self.create_txg == 0 && !allow_createtxg_zero() {
            return Err(AbstractionError::ZeroBound { bound });
        }
        Ok(())
    }
}

/// A non-empty range of CreateTXGs. If both sides are `None`, any
/// CreateTXG is acceptable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTxgRange {
    /// Lower bound; `None` means no constraint.
    pub since: Option<CreateTxgRangeBound>,
    /// Upper bound; `None` means no constraint.
    pub until: Option<CreateTxgRangeBound>,
}

/// Inclusive-inclusive bounds after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EffectiveBounds {
    since: Option<u64>,
    until: Option<u64>,
}

impl CreateTxgRange {
    pub const fn unbounded() -> Self {
        Self {
            since: None,
            until: None,
        }
    }

    /// Build and validate a range.
    pub fn new(
        since: Option<CreateTxgRangeBound>,
        until: Option<CreateTxgRangeBound>,
    ) -> Result<Self, AbstractionError> {
        let range = Self { since, until };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<(), AbstractionError> {
        if let Some(since) = &self.since {
            since.validate("Since")?;
        }
        if let Some(until) = &self.until {
            until.validate("Until")?;
        }
        self.effective_bounds()
            .map(|_| ())
            .map_err(|reason| AbstractionError::InvalidRange {
                range: self.to_string(),
                reason,
            })
    }

    fn effective_bounds(&self) -> Result<EffectiveBounds, String> {
        let since = match self.since {
            None => None,
            Some(b) if b.inclusive => Some(b.create_txg),
            Some(b) => Some(b.create_txg.checked_add(1).ok_or_else(|| {
                format!(
                    "Since-exclusive ({}) must be less than u64::MAX ({})",
                    b.create_txg,
                    u64::MAX
                )
            })?),
        };

        let until = match self.until {
            None => None,
            Some(b) if b.inclusive => Some(b.create_txg),
            Some(b) => Some(b.create_txg.checked_sub(1).ok_or_else(|| {
                format!("Until-exclusive ({}) must be greater than 0", b.create_txg)
            })?),
        };

        if let (Some(since), Some(until)) = (since, until) {
            if since > until {
                return Err(format!(
                    "effective range bounds are [{},{}] which is empty",
                    since, until
                ));
            }
        }

        Ok(EffectiveBounds { since, until })
    }

    /// Bounds of a range the caller promised is valid.
    ///
    /// Panics otherwise: using an unvalidated range is a bug in the caller.
    fn validated_bounds(&self) -> EffectiveBounds {
        if let Err(err) = self.validate() {
            panic!("CreateTXG range used without validation: {}", err);
        }
        match self.effective_bounds() {
            Ok(bounds) => bounds,
            Err(reason) => panic!("CreateTXG range {} invalid after validation: {}", self, reason),
        }
    }

    /// True iff neither side constrains the range. Panics on an invalid range.
    pub fn is_unbounded(&self) -> bool {
        let bounds = self.validated_bounds();
        bounds.since.is_none() && bounds.until.is_none()
    }

    /// Membership test against the normalized bounds. Panics on an invalid range.
    pub fn contains(&self, create_txg: u64) -> bool {
        let bounds = self.validated_bounds();
        let since_matches = bounds.since.is_none_or(|since| since <= create_txg);
        let until_matches = bounds.until.is_none_or(|until| create_txg <= until);
        since_matches && until_matches
    }
}

impl fmt::Display for CreateTxgRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.since {
            None => write!(f, "~")?,
            Some(b) => write!(f, "{}{}", if b.inclusive { '[' } else { '(' }, b.create_txg)?,
        }
        write!(f, ",")?;
        match &self.until {
            None => write!(f, "~"),
            Some(b) => write!(f, "{}{}", b.create_txg, if b.inclusive { ']' } else { ')' }),
        }
    }
}
