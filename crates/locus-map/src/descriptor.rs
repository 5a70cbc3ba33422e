/// Family a descriptor belongs to.
///
/// Matching is only defined within one kind; distances across kinds are
/// meaningless and candidate sets are narrowed by kind before search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    /// Real-valued descriptors compared with Euclidean distance.
    Float,
    /// Bit-packed binary descriptors compared with Hamming distance.
    Binary,
}

/// A feature descriptor attached to a landmark or a query keypoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    /// Real-valued descriptor (e.g. SIFT-like, 128 floats).
    Float(Vec<f32>),
    /// Bit-packed binary descriptor (e.g. ORB-like, 32 bytes).
    Binary(Vec<u8>),
}

impl Descriptor {
    /// Kind tag of this descriptor.
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Descriptor::Float(_) => DescriptorKind::Float,
            Descriptor::Binary(_) => DescriptorKind::Binary,
        }
    }

    /// Whether two descriptors can be compared at all.
    pub fn compatible(&self, other: &Descriptor) -> bool {
        match (self, other) {
            (Descriptor::Float(a), Descriptor::Float(b)) => a.len() == b.len(),
            (Descriptor::Binary(a), Descriptor::Binary(b)) => a.len() == b.len(),
            _ => false,
        }
    }

    /// Distance between two descriptors of the same kind and length.
    ///
    /// Euclidean distance for float descriptors, Hamming bit count for
    /// binary ones. Returns `None` for incompatible operands.
    pub fn distance(&self, other: &Descriptor) -> Option<f64> {
        if !self.compatible(other) {
            return None;
        }
        match (self, other) {
            (Descriptor::Float(a), Descriptor::Float(b)) => {
                let sum_sq: f64 = a
                    .iter()
                    .zip(b.iter())
                    .map(|(&x, &y)| {
                        let d = f64::from(x) - f64::from(y);
                        d * d
                    })
                    .sum();
                Some(sum_sq.sqrt())
            }
            (Descriptor::Binary(a), Descriptor::Binary(b)) => {
                let bits: u32 = a
                    .iter()
                    .zip(b.iter())
                    .map(|(&x, &y)| (x ^ y).count_ones())
                    .sum();
                Some(f64::from(bits))
            }
            _ => None,
        }
    }
}
