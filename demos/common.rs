use arbitrary::Unstructured;
use rand::{rngs::StdRng, RngCore, SeedableRng};

/// Fills `buf` from the seed given as the first program argument, or from
/// a random seed if there is none. The seed is printed so a run can be replayed.
pub fn rand_u<'a>(buf: &'a mut [u8]) -> Unstructured<'a> {
    let seed = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(rand::random);
    eprintln!("seed: {}", seed);
    StdRng::seed_from_u64(seed).fill_bytes(buf);
    Unstructured::new(buf)
}

#[allow(dead_code)]
fn main() {}
