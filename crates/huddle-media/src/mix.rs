//! Clip mixing
//!
//! Contributions are summed in `i32` and clipped to the `i16` range once at
//! the end, so intermediate overflow can never wrap.

/// Sum every contribution sample-wise and clip to the valid range
///
/// Contributions shorter than `len` are treated as padded with silence;
/// longer ones are truncated.
pub fn mix_clipped<'a, I>(len: usize, contributions: I) -> Vec<i16>
where
    I: IntoIterator<Item = &'a [i16]>,
{
    let mut acc = vec![0i32; len];
    for samples in contributions {
        for (slot, &sample) in acc.iter_mut().zip(samples) {
            *slot += sample as i32;
        }
    }

    acc.into_iter().map(clip).collect()
}

/// Mix for one listener: every contribution except the listener's own
pub fn mix_excluding<K: PartialEq>(
    listener: &K,
    contributions: &[(K, Vec<i16>)],
    len: usize,
) -> Vec<i16> {
    mix_clipped(
        len,
        contributions
            .iter()
            .filter(|(sender, _)| sender != listener)
            .map(|(_, samples)| samples.as_slice()),
    )
}

#[inline]
fn clip(sample: i32) -> i16 {
    sample.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}
