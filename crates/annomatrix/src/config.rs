use crate::field::Field;

/// Maximum number of resident, evictable columns per field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldCaps {
    pub obs: usize,
    pub var: usize,
    pub x: usize,
    pub emb: usize,
}

impl FieldCaps {
    pub fn get(&self, field: Field) -> usize {
        match field {
            Field::Obs => self.obs,
            Field::Var => self.var,
            Field::X => self.x,
            Field::Emb => self.emb,
        }
    }
}

/// Column caps for the live proxy (`hot`) and for proxies retained as history (`cold`).
///
/// The numbers are tuning constants. Only `hot >= cold` is expected of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GcConfig {
    pub hot: FieldCaps,
    pub cold: FieldCaps,
}

impl GcConfig {
    pub fn caps(&self, is_hot: bool) -> &FieldCaps {
        if is_hot {
            &self.hot
        } else {
            &self.cold
        }
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            hot: FieldCaps {
                obs: 512,
                var: 512,
                x: 256,
                emb: 32,
            },
            cold: FieldCaps {
                obs: 16,
                var: 16,
                x: 8,
                emb: 4,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProxyConfig {
    pub gc: GcConfig,
    /// Capacity of the sub-selection memo shared by a proxy and its clones (default: 128).
    pub subset_memo_entries: usize,
}

impl ProxyConfig {
    pub(crate) fn sanitized(mut self) -> Self {
        self.subset_memo_entries = self.subset_memo_entries.max(1);
        self
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            gc: GcConfig::default(),
            subset_memo_entries: 128,
        }
    }
}
