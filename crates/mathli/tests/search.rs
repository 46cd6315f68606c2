//! End-to-end scenarios over a real index directory.

use std::time::Duration;

use mathli::{Error, Indexer, Indices, IndicesWriter, Search, TimeBudget};

fn build_index(docs: &[&str]) -> (tempfile::TempDir, Indices) {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = IndicesWriter::create(dir.path()).unwrap();
    {
        let mut indexer = Indexer::new(&mut writer);
        for (i, text) in docs.iter().enumerate() {
            indexer.index_document(&format!("doc://{}", i + 1), text).unwrap();
        }
    }
    writer.seal().unwrap();
    let indices = Indices::open(dir.path()).unwrap();
    (dir, indices)
}

#[test]
fn identical_formula_scores_its_self_similarity() {
    let (_dir, indices) = build_index(&["[imath]a+b[/imath]"]);

    let mut search = Search::new(&indices);
    search.query("[imath]a+b[/imath]");
    let result = search.execute().unwrap();

    assert_eq!(result.hits.len(), 1);
    let hit = &result.hits[0];
    assert_eq!(hit.doc, 1);
    // one element of prefix length 2 with two duplicates, perfectly aligned
    assert_eq!(hit.score, 2.0);
    assert_eq!(hit.exp_ids, vec![0]);
}

#[test]
fn partial_symbol_overlap_ranks_below_exact() {
    let (_dir, indices) = build_index(&["[imath]a+b[/imath]", "[imath]a+c[/imath]"]);

    let mut search = Search::new(&indices);
    search.query("[imath]a+b[/imath]");
    let result = search.execute().unwrap();

    assert_eq!(result.hits.len(), 2);
    assert_eq!(result.hits[0].doc, 1);
    assert_eq!(result.hits[1].doc, 2);
    assert!(result.hits[0].score >= 2.0 * result.hits[1].score);
}

#[test]
fn structure_mismatch_contributes_nothing() {
    let (_dir, indices) = build_index(&["[imath]\\frac{x}{y}[/imath]", "[imath]x[/imath]"]);

    let mut search = Search::new(&indices);
    search.query("[imath]\\frac{x}{y}[/imath]");
    let result = search.execute().unwrap();

    // the bare variable has no element reaching the query's sector trees
    assert_eq!(result.hits.len(), 1);
    assert_eq!(result.hits[0].doc, 1);
}

#[test]
fn commuted_operands_rank_equally() {
    let (_dir, indices) = build_index(&[
        "[imath](a+b)+(c+d)[/imath]",
        "[imath](c+d)+(a+b)[/imath]",
        "[imath](a+e)+(c+f)[/imath]",
    ]);

    let mut search = Search::new(&indices);
    search.query("[imath](a+b)+(c+d)[/imath]");
    let result = search.execute().unwrap();

    // swapping the two sums moves the duplicates to the other sector tree
    // without changing the expression; partial symbol overlap still trails
    assert_eq!(result.hits.len(), 3);
    assert_eq!(result.hits[0].doc, 1);
    assert_eq!(result.hits[1].doc, 2);
    assert_eq!(result.hits[0].score, result.hits[1].score);
    assert!(result.hits[2].score < result.hits[1].score);
    assert_eq!(result.hits[2].doc, 3);
}

#[test]
fn oversized_expression_is_skipped_and_counted() {
    let big: String = {
        let terms: Vec<&str> = std::iter::repeat("a").take(65).collect();
        format!("[imath]{}[/imath]", terms.join("+"))
    };

    let dir = tempfile::tempdir().unwrap();
    let mut writer = IndicesWriter::create(dir.path()).unwrap();
    let mut overflowed = false;
    {
        let mut indexer = Indexer::new(&mut writer);
        indexer.on_parser_exception(|_, err| {
            overflowed = matches!(err, Error::Overflow { .. });
        });
        indexer.index_document("doc://big", &big).unwrap();
        assert_eq!(indexer.n_parse_err(), 1);
    }
    assert!(overflowed);
    writer.seal().unwrap();

    // the expression never reached the math index
    let indices = Indices::open(dir.path()).unwrap();
    let mut search = Search::new(&indices);
    search.query("[imath]a+a[/imath]");
    assert!(search.execute().unwrap().hits.is_empty());
}

#[test]
fn truncated_posting_file_refuses_to_open() {
    let (dir, indices) = build_index(&["[imath]a+b[/imath]"]);
    drop(indices);

    let post = dir.path().join("math").join("path.post");
    let bytes = std::fs::read(&post).unwrap();
    std::fs::write(&post, &bytes[..bytes.len() - 16]).unwrap();

    assert!(matches!(Indices::open(dir.path()), Err(Error::Corrupt { .. })));
}

#[test]
fn growing_top_k_extends_the_ranking_in_place() {
    let mut docs = Vec::new();
    for i in 0..25 {
        // alternate exact and partial matches so scores interleave
        if i % 2 == 0 {
            docs.push("some words [imath]a+b[/imath]".to_string());
        } else {
            docs.push("some words [imath]a+q[/imath]".to_string());
        }
    }
    let doc_refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    let (_dir, indices) = build_index(&doc_refs);

    let run = |k: usize| {
        let mut search = Search::new(&indices);
        search.query("[imath]a+b[/imath]");
        search.top_k(k);
        search.execute().unwrap().hits
    };

    let ten = run(10);
    let twenty = run(20);
    assert_eq!(ten.len(), 10);
    assert_eq!(twenty.len(), 20);
    for (a, b) in ten.iter().zip(&twenty) {
        assert_eq!(a.doc, b.doc);
        assert_eq!(a.score, b.score);
    }
}

#[test]
fn mixed_query_combines_text_and_math() {
    let (_dir, indices) = build_index(&[
        "the limit of [imath]a+b[/imath] as n grows",
        "unrelated prose about groups",
        "the limit again",
    ]);

    let mut search = Search::new(&indices);
    search.query("limit [imath]a+b[/imath]");
    let result = search.execute().unwrap();

    // text+math beats text-only beats nothing
    assert_eq!(result.hits[0].doc, 1);
    assert_eq!(result.hits.len(), 2);
    assert!(result.hits[0].score > result.hits[1].score);
    assert_eq!(result.hits[1].doc, 3);
}

#[test]
fn expired_deadline_degrades_instead_of_failing() {
    let (_dir, indices) = build_index(&["[imath]a+b[/imath]", "[imath]a+c[/imath]"]);

    let mut search = Search::new(&indices);
    search.query("[imath]a+b[/imath]");
    search.time_budget(TimeBudget::new(Duration::ZERO));
    let result = search.execute().unwrap();

    assert!(result.stats.degraded);
    assert!(result.hits.len() <= 2);
}

#[test]
fn cached_and_uncached_queries_agree() {
    let (dir, indices) = build_index(&[
        "[imath]a+b[/imath]",
        "[imath]a+c[/imath]",
        "[imath]\\frac{a}{b}[/imath]",
    ]);

    let mut search = Search::new(&indices);
    search.query("[imath]a+b[/imath]");
    let cold = search.execute().unwrap();

    let mut warm_indices = Indices::open(dir.path()).unwrap();
    warm_indices.cache(u64::MAX).unwrap();
    let mut search = Search::new(&warm_indices);
    search.query("[imath]a+b[/imath]");
    let warm = search.execute().unwrap();

    assert_eq!(cold.hits.len(), warm.hits.len());
    for (a, b) in cold.hits.iter().zip(&warm.hits) {
        assert_eq!(a.doc, b.doc);
        assert_eq!(a.score, b.score);
    }
}

#[test]
fn empty_query_is_an_error() {
    let (_dir, indices) = build_index(&["[imath]a+b[/imath]"]);
    let mut search = Search::new(&indices);
    search.query("   ");
    assert!(matches!(search.execute(), Err(Error::EmptyQuery)));
}

#[test]
fn urls_and_bodies_read_back_for_hits() {
    let (_dir, indices) = build_index(&["see [imath]a+b[/imath] here"]);

    let mut search = Search::new(&indices);
    search.query("[imath]a+b[/imath]");
    let result = search.execute().unwrap();
    let doc = result.hits[0].doc;

    assert_eq!(indices.read_url(doc).unwrap(), b"doc://1");
    assert_eq!(indices.read_doc(doc).unwrap(), b"see [imath]a+b[/imath] here");
}
