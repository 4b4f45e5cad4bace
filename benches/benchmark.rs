use divan::{
    black_box,
    Bencher,
};
use patricia_merkle_set::Set;

// allow: unused warning if `bench_include_allocs` feature is not enabled.
#[allow(dead_code)]
#[cfg_attr(feature = "bench_include_allocs", global_allocator)]
static ALLOC: divan::AllocProfiler = divan::AllocProfiler::system();

/// Default block geometry used by every benchmark except the ones that
/// sweep over geometry directly.
const DEPTH: u32 = 4;
const LEAF_UNITS: u16 = 32;

macro_rules! benchmark_mods {
    ($([$mod_name:ident $count:literal])+) => {
        $(
            mod $mod_name {
                #[divan::bench]
                fn construct_set(bencher: divan::Bencher) {
                    crate::construct_set(bencher, $count);
                }

                #[divan::bench]
                fn construct_proof(bencher: divan::Bencher) {
                    crate::construct_proof(bencher, $count);
                }

                #[divan::bench]
                fn verify_proof(bencher: divan::Bencher) {
                    crate::verify_proof(bencher, $count);
                }

                #[divan::bench]
                fn remove_half(bencher: divan::Bencher) {
                    crate::remove_half(bencher, $count);
                }
            }
        )+
    };
}

benchmark_mods! {
    [one_hundred_elements 100]
    [one_thousand_elements 1_000]
    [ten_thousand_elements 10_000]
}

/// Benchmark building a new [`Set`] from scratch, including the final
/// [`Set::get_root`] that forces every pending lazy hash.
fn construct_set(bencher: Bencher, count: usize) {
    bencher
        .with_inputs(|| raw_leaves(count))
        .bench_local_refs(|leaves| {
            let mut set = Set::new(DEPTH, LEAF_UNITS);
            for leaf in leaves.iter() {
                set.add(leaf);
            }
            black_box(set.get_root());
            black_box(set);
        });
}

/// Benchmark constructing an inclusion proof for every element of a
/// fully-built set.
fn construct_proof(bencher: Bencher, count: usize) {
    bencher
        .with_inputs(|| {
            let leaves = raw_leaves(count);
            let mut set = Set::new(DEPTH, LEAF_UNITS);
            for leaf in &leaves {
                set.add(leaf);
            }
            set.get_root();
            (set, leaves)
        })
        .bench_local_refs(|(set, leaves)| {
            for leaf in leaves.iter() {
                black_box(set.is_included(leaf));
            }
        });
}

/// Benchmark verifying a proof of inclusion against the set's root, without
/// access to the tree itself.
fn verify_proof(bencher: Bencher, count: usize) {
    bencher
        .with_inputs(|| {
            let leaves = raw_leaves(count);
            let mut set = Set::new(DEPTH, LEAF_UNITS);
            for leaf in &leaves {
                set.add(leaf);
            }
            let root = set.get_root();
            let proofs: Vec<_> = leaves.iter().map(|leaf| set.is_included(leaf).1).collect();
            (leaves, proofs, root)
        })
        .bench_local_refs(|(leaves, proofs, root)| {
            for (leaf, proof) in leaves.iter().zip(proofs.iter()) {
                assert!(patricia_merkle_set::confirm_included(leaf, proof, root));
            }
        });
}

/// Benchmark removing half of a fully-built set's elements.
fn remove_half(bencher: Bencher, count: usize) {
    bencher
        .with_inputs(|| {
            let leaves = raw_leaves(count);
            let mut set = Set::new(DEPTH, LEAF_UNITS);
            for leaf in &leaves {
                set.add(leaf);
            }
            (set, leaves)
        })
        .bench_local_refs(|(set, leaves)| {
            for leaf in leaves.iter().take(leaves.len() / 2) {
                set.remove(leaf);
            }
        });
}

/// Returns `count` distinct 32-byte leaves.
fn raw_leaves(count: usize) -> Vec<[u8; 32]> {
    (0..count)
        .map(|i| {
            let mut buf = [0u8; 32];
            buf[..8].copy_from_slice(&(i as u64).to_be_bytes());
            buf
        })
        .collect()
}

fn main() {
    // Handle `nextest` querying the benchmark binary for tests. `divan` is
    // currently incompatible with `nextest`, so just report no tests
    // available. See https://github.com/nvzqz/divan/issues/43.
    let args: Vec<_> = std::env::args().collect();
    if args.contains(&"--list".to_string()) && args.contains(&"--format".to_string()) && args.contains(&"terse".to_string()) {
        return;
    }
    divan::main();
}
