use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mathli::{
    Error, Indexer, Indices, IndicesWriter, ResponseCode, Search, SearchRequest, TimeBudget,
};
use serde::Deserialize;
use serde_json::json;

/// Offline indexer exit codes.
const EXIT_OPEN_FAILURE: u8 = 1;
const EXIT_PARSE_FAILURE: u8 = 2;
const EXIT_IO_FAILURE: u8 = 3;

#[derive(Parser)]
#[command(name = "mathtool", about = "Build and query a mathli index from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a JSON-lines corpus: one {"url": ..., "text": ...} per line,
    /// with [imath]...[/imath] math segments inside the text
    Index {
        index_dir: PathBuf,
        corpus: PathBuf,
        /// Abort on the first TeX parse error instead of skipping the expression
        #[arg(long)]
        strict: bool,
    },
    /// Run a query against an index and print the JSON response
    Search {
        index_dir: PathBuf,
        /// Query text: words and [imath]...[/imath] segments
        query: String,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
        #[arg(long)]
        deadline_ms: Option<u64>,
        /// Parse QUERY as a JSON request object instead of plain text
        #[arg(long)]
        json: bool,
        /// Math posting cache budget in bytes
        #[arg(long, default_value_t = 16 << 20)]
        cache: u64,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).with_target(false).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Index { index_dir, corpus, strict } => index(&index_dir, &corpus, strict),
        Command::Search { index_dir, query, top_k, deadline_ms, json, cache } => {
            search(&index_dir, &query, top_k, deadline_ms, json, cache)
        }
    }
}

#[derive(Deserialize)]
struct CorpusDoc {
    url: String,
    text: String,
}

fn index(index_dir: &PathBuf, corpus: &PathBuf, strict: bool) -> ExitCode {
    let mut writer = match IndicesWriter::create(index_dir) {
        Ok(writer) => writer,
        Err(err) => {
            tracing::error!(%err, "cannot create index");
            return ExitCode::from(EXIT_OPEN_FAILURE);
        }
    };

    let file = match std::fs::File::open(corpus) {
        Ok(file) => file,
        Err(err) => {
            tracing::error!(%err, "cannot open corpus");
            return ExitCode::from(EXIT_IO_FAILURE);
        }
    };

    let (n_tex, n_err) = {
        let mut indexer = Indexer::new(&mut writer);
        indexer.tolerate_parse_errors(!strict);
        indexer.on_parser_exception(|tex_src, err| {
            tracing::warn!(tex = tex_src, %err, "expression skipped");
        });

        for (lineno, line) in std::io::BufReader::new(file).lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    tracing::error!(%err, lineno, "corpus read failed");
                    return ExitCode::from(EXIT_IO_FAILURE);
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let doc: CorpusDoc = match serde_json::from_str(&line)
                .with_context(|| format!("corpus line {lineno} is not valid JSON"))
            {
                Ok(doc) => doc,
                Err(err) => {
                    tracing::error!(err = format!("{err:#}"), "bad corpus");
                    return ExitCode::from(EXIT_IO_FAILURE);
                }
            };
            match indexer.index_document(&doc.url, &doc.text) {
                Ok(doc_id) => tracing::debug!(doc_id, url = doc.url, "indexed"),
                Err(err @ (Error::Parse(_) | Error::Overflow { .. })) => {
                    tracing::error!(%err, lineno, "parse error not tolerated");
                    return ExitCode::from(EXIT_PARSE_FAILURE);
                }
                Err(err) => {
                    tracing::error!(%err, lineno, "indexing failed");
                    return ExitCode::from(EXIT_IO_FAILURE);
                }
            }
        }

        (indexer.n_parse_tex(), indexer.n_parse_err())
    };
    let n_docs = writer.n_docs();
    if let Err(err) = writer.seal() {
        tracing::error!(%err, "sealing failed");
        return ExitCode::from(EXIT_IO_FAILURE);
    }

    tracing::info!(n_docs, n_tex, n_parse_err = n_err, "index sealed");
    ExitCode::SUCCESS
}

fn search(
    index_dir: &PathBuf,
    query: &str,
    top_k: usize,
    deadline_ms: Option<u64>,
    as_json: bool,
    cache: u64,
) -> ExitCode {
    let request = if as_json {
        match serde_json::from_str::<SearchRequest>(query) {
            Ok(request) => request,
            Err(err) => {
                respond_err(ResponseCode::BadQryJson, &err.to_string());
                return ExitCode::SUCCESS;
            }
        }
    } else {
        SearchRequest {
            tex_source: query.to_string(),
            dir_merge_depth_policy: Default::default(),
            top_k,
            deadline_ms: deadline_ms.unwrap_or(0),
        }
    };

    if request.top_k == 0 {
        respond_err(ResponseCode::IllegalPagenum, "top_k must be positive");
        return ExitCode::SUCCESS;
    }

    let mut indices = match Indices::open(index_dir) {
        Ok(indices) => indices,
        Err(err) => {
            tracing::error!(%err, "cannot open index");
            return ExitCode::from(EXIT_OPEN_FAILURE);
        }
    };
    if let Err(err) = indices.cache(cache) {
        tracing::error!(%err, "cache load failed");
        return ExitCode::from(EXIT_OPEN_FAILURE);
    }

    let mut search = Search::from_request(&indices, &request);
    if let Some(ms) = deadline_ms {
        search.time_budget(TimeBudget::new(Duration::from_millis(ms)));
    }

    let result = match search.execute() {
        Ok(result) => result,
        Err(Error::EmptyQuery) => {
            respond_err(ResponseCode::EmptyQry, ResponseCode::EmptyQry.message());
            return ExitCode::SUCCESS;
        }
        Err(err @ Error::TooManyMathKeywords { .. }) => {
            respond_err(ResponseCode::TooManyMathKw, &err.to_string());
            return ExitCode::SUCCESS;
        }
        Err(err @ Error::TooManyTermKeywords { .. }) => {
            respond_err(ResponseCode::TooManyTermKw, &err.to_string());
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            tracing::error!(%err, "search failed");
            return ExitCode::from(EXIT_IO_FAILURE);
        }
    };

    if result.hits.is_empty() {
        respond_err(ResponseCode::NoHitFound, ResponseCode::NoHitFound.message());
        return ExitCode::SUCCESS;
    }

    let hits: Vec<_> = result
        .hits
        .iter()
        .map(|hit| {
            let url = indices
                .read_url(hit.doc)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .unwrap_or_default();
            json!({
                "doc": hit.doc,
                "score": hit.score,
                "exp_ids": hit.exp_ids,
                "url": url,
            })
        })
        .collect();
    let response = json!({
        "code": ResponseCode::Succ.code(),
        "msg": ResponseCode::Succ.message(),
        "hits": hits,
        "stats": result.stats,
    });
    println!("{}", serde_json::to_string_pretty(&response).expect("response serializes"));
    ExitCode::SUCCESS
}

fn respond_err(code: ResponseCode, message: &str) {
    let response = json!({ "code": code.code(), "msg": message });
    println!("{}", serde_json::to_string_pretty(&response).expect("response serializes"));
}
