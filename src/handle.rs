use core::fmt;

use crate::error::PoolError;
use crate::pool::StringPool;
use crate::table::AllocId;
use crate::Unit;

/// A copyable two-word reference to a pooled string: the owning pool plus
/// an [`AllocId`].
///
/// Handles never own storage; validity is derived from the pool's live
/// state on every dereference, so a handle to freed storage reports
/// [`PoolError::StaleId`] instead of reading whatever now occupies the
/// bytes. Id 0 always resolves to the empty string, even on the detached
/// [`StrRef::EMPTY`] constant that carries no pool at all.
///
/// Freeing goes through the pool: `pool.free(handle.id())`. The pool's
/// `free` is unconditional and idempotent, so this is safe to call any
/// number of times.
#[derive(Clone, Copy)]
pub struct StrRef<'p> {
    pool: Option<&'p StringPool>,
    id: AllocId,
}

impl StrRef<'static> {
    /// The canonical empty string, attached to no pool.
    pub const EMPTY: StrRef<'static> = StrRef {
        pool: None,
        id: AllocId::EMPTY,
    };
}

impl<'p> StrRef<'p> {
    pub(crate) fn new(pool: &'p StringPool, id: AllocId) -> StrRef<'p> {
        StrRef { pool: Some(pool), id }
    }

    pub fn id(&self) -> AllocId {
        self.id
    }

    /// The stored code units.
    pub fn as_units(&self) -> Result<&'p [Unit], PoolError> {
        if self.id.is_empty_id() {
            return Ok(&[]);
        }
        match self.pool {
            Some(pool) => pool.read(self.id),
            None => Err(PoolError::StaleId(self.id)),
        }
    }

    /// The stored units as UTF-8 text.
    pub fn as_str(&self) -> Result<&'p str, PoolError> {
        let units = self.as_units()?;
        core::str::from_utf8(units)
            .map_err(|_| PoolError::InvalidArgument("allocation holds non-UTF-8 units"))
    }

    pub fn len_units(&self) -> Result<usize, PoolError> {
        if self.id.is_empty_id() {
            return Ok(0);
        }
        match self.pool {
            Some(pool) => pool.length_units(self.id),
            None => Err(PoolError::StaleId(self.id)),
        }
    }

    pub fn is_empty(&self) -> Result<bool, PoolError> {
        Ok(self.len_units()? == 0)
    }

    /// Whether this handle currently resolves.
    pub fn is_live(&self) -> bool {
        self.id.is_empty_id() || self.pool.map_or(false, |pool| pool.is_live(self.id))
    }
}

impl fmt::Debug for StrRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrRef")
            .field("id", &self.id)
            .field("attached", &self.pool.is_some())
            .finish()
    }
}
