/// Byte key for a feature or staged edit: big-endian layer id followed by the object id
/// with its sign bit flipped, so keys sort by layer then by object id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureKey {
    pub layer_id: u32,
    pub object_id: i64,
}

const KEY_LEN: usize = 12;

impl FeatureKey {
    pub fn new(layer_id: u32, object_id: i64) -> Self {
        Self {
            layer_id,
            object_id,
        }
    }

    pub fn to_bytes(self) -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        key[..4].copy_from_slice(&self.layer_id.to_be_bytes());
        key[4..].copy_from_slice(&((self.object_id as u64) ^ (1 << 63)).to_be_bytes());
        key
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != KEY_LEN {
            return None;
        }
        let layer_id = u32::from_be_bytes(bytes[..4].try_into().ok()?);
        let raw = u64::from_be_bytes(bytes[4..].try_into().ok()?);
        Some(Self {
            layer_id,
            object_id: (raw ^ (1 << 63)) as i64,
        })
    }

    /// Inclusive bounds covering every key of `layer_id`.
    pub fn range_for_layer(layer_id: u32) -> ([u8; KEY_LEN], [u8; KEY_LEN]) {
        (
            FeatureKey::new(layer_id, i64::MIN).to_bytes(),
            FeatureKey::new(layer_id, i64::MAX).to_bytes(),
        )
    }
}
