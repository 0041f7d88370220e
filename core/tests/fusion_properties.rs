use fuseqa_core::fusion::{fuse, fuse_with, RrfConfig};
use fuseqa_core::RankedList;
use std::collections::{HashMap, HashSet};

fn list(ids: &[&str]) -> RankedList { ids.iter().map(|s| s.to_string()).collect() }

fn sample_lists() -> Vec<RankedList> {
    vec![
        list(&["d4", "d1", "d9", "d2"]),
        list(&["d1", "d2"]),
        list(&["d7", "d9", "d3", "d4", "d5", "d6"]),
        list(&[]),
    ]
}

#[test]
fn every_appearance_contributes_at_least_its_reciprocal_rank() {
    let k = 60;
    let lists = sample_lists();
    let scores: HashMap<String, f64> = fuse(&lists, k, usize::MAX).into_iter().collect();
    for l in &lists {
        for (i, doc) in l.iter().enumerate() {
            let floor = 1.0 / ((i + 1) as f64 + k as f64);
            assert!(scores[doc] >= floor - 1e-15, "{doc} below {floor}");
        }
    }
}

#[test]
fn fusing_a_list_with_itself_doubles_scores() {
    let l = list(&["a", "b", "c", "d"]);
    let once: HashMap<String, f64> = fuse(&[l.clone()], 60, 10).into_iter().collect();
    let twice: HashMap<String, f64> = fuse(&[l.clone(), l.clone()], 60, 10).into_iter().collect();
    let thrice: HashMap<String, f64> = fuse(&[l.clone(), l.clone(), l], 60, 10).into_iter().collect();
    for (doc, s) in &once {
        assert!((twice[doc] - 2.0 * s).abs() < 1e-12);
        assert!((thrice[doc] - 3.0 * s).abs() < 1e-12);
    }
}

#[test]
fn output_is_bounded_unique_and_descending() {
    let lists = sample_lists();
    for top_n in [0usize, 1, 3, 5, 100] {
        let fused = fuse(&lists, 60, top_n);
        assert!(fused.len() <= top_n);
        let unique: HashSet<&String> = fused.iter().map(|(d, _)| d).collect();
        assert_eq!(unique.len(), fused.len());
        assert!(fused.windows(2).all(|w| w[0].1 >= w[1].1));
    }
}

#[test]
fn smaller_k_sharpens_rank_differences() {
    let lists = vec![list(&["a", "b"])];
    let sharp = fuse_with(&lists, &RrfConfig { k: 1, top_n: 2 });
    let flat = fuse_with(&lists, &RrfConfig::default());
    assert!(sharp[0].1 / sharp[1].1 > flat[0].1 / flat[1].1);
}

#[test]
fn fixed_arity_calls_match_the_general_form() {
    let (a, b, c) = (list(&["x", "y"]), list(&["y", "z"]), list(&["z", "x"]));
    let pair = fuse(&[a.clone(), b.clone()], 60, 10);
    let as_vec = fuse(&vec![a.clone(), b.clone()], 60, 10);
    assert_eq!(pair, as_vec);
    let six = fuse(&[a.clone(), b.clone(), c.clone(), a, b, c], 60, 10);
    assert_eq!(six.len(), 3);
}
