//! Generate a synthetic snippet library for benchmarks and manual testing.
//!
//! Usage:
//!     cargo run --release --bin generate-synthetic-lib -- --count 10000 --output synthetic.zcl2

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use codelib::{persistence, Attachment, Snippet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of snippets to generate
    #[arg(short, long, default_value_t = 10_000)]
    count: usize,

    /// Where to write the library file
    #[arg(short, long, default_value = "synthetic.zcl2")]
    output: PathBuf,

    /// Minimum content size in bytes
    #[arg(long, default_value_t = 1_000)]
    min_size: usize,

    /// Maximum content size in bytes
    #[arg(long, default_value_t = 20_000)]
    max_size: usize,

    /// Fraction of snippets that get a text attachment
    #[arg(long, default_value_t = 0.1)]
    attachment_ratio: f64,

    /// Fraction of snippets written as tombstones
    #[arg(long, default_value_t = 0.02)]
    deleted_ratio: f64,

    /// RNG seed, for reproducible libraries
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Sample code for realistic content
const CODE_SNIPPETS: &[&str] = &[
    r#"
def process_data(input_data):
    """Process input data and return transformed result."""
    if not input_data:
        return None
    return [transform_item(item) for item in input_data]
"#,
    r#"
public class DataProcessor {
    private final Map<String, Object> cache = new HashMap<>();

    public Object process(String key) {
        return cache.computeIfAbsent(key, this::load);
    }
}
"#,
    r#"
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let server = Server::bind(&config.addr)?;
    server.run()
}
"#,
    r#"
SELECT u.id, u.name, COUNT(o.id) AS orders
FROM users u LEFT JOIN orders o ON o.user_id = u.id
GROUP BY u.id, u.name
ORDER BY orders DESC;
"#,
    r#"
#!/bin/bash
set -euo pipefail
for f in *.log; do
    gzip -9 "$f"
done
"#,
];

const LANGUAGES: &[&str] = &[
    "java", "python", "rust", "sql", "bash", "javascript", "go", "c", "cpp", "kotlin",
];

const TOPICS: &[&str] = &[
    "gui", "swing", "network", "socket", "thread", "pool", "cache", "regex", "json", "xml",
    "file", "io", "database", "jdbc", "test", "async", "parser", "logging", "crypto", "http",
];

const LOREM_WORDS: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit", "sed", "do",
    "eiusmod", "tempor", "incididunt", "ut", "labore", "et", "dolore", "magna", "aliqua",
    "enim", "ad", "minim", "veniam", "quis", "nostrud", "exercitation", "ullamco", "laboris",
];

fn generate_keywords(rng: &mut StdRng) -> String {
    let language = LANGUAGES[rng.gen_range(0..LANGUAGES.len())];
    let topics = rng.gen_range(1..=3);
    let mut parts = vec![language.to_string()];
    for _ in 0..topics {
        parts.push(TOPICS[rng.gen_range(0..TOPICS.len())].to_string());
    }
    parts.join(", ")
}

fn generate_content(rng: &mut StdRng, target_size: usize) -> Vec<u8> {
    let mut text = String::with_capacity(target_size + 256);
    text.push_str(CODE_SNIPPETS[rng.gen_range(0..CODE_SNIPPETS.len())]);

    while text.len() < target_size {
        let paragraph_len = rng.gen_range(20..=80);
        for _ in 0..paragraph_len {
            text.push_str(LOREM_WORDS[rng.gen_range(0..LOREM_WORDS.len())]);
            text.push(' ');
        }
        if rng.gen_bool(0.3) {
            text.push_str(TOPICS[rng.gen_range(0..TOPICS.len())]);
        }
        text.push_str(".\n");
    }

    text.truncate(target_size);
    text.into_bytes()
}

fn main() -> Result<()> {
    let args = Args::parse();
    anyhow::ensure!(args.min_size <= args.max_size, "--min-size must not exceed --max-size");

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut snippets = Vec::with_capacity(args.count);
    let mut total_size = 0usize;

    println!("Generating {} snippets...", args.count);
    for i in 0..args.count {
        let size = rng.gen_range(args.min_size..=args.max_size);
        let mut snippet = Snippet::with_text(&generate_keywords(&mut rng), generate_content(&mut rng, size));

        if rng.gen_bool(args.attachment_ratio.clamp(0.0, 1.0)) {
            let body = generate_content(&mut rng, size / 4);
            snippet.add_attachment(Attachment::new(format!("notes-{i}.txt"), body));
        }
        if rng.gen_bool(args.deleted_ratio.clamp(0.0, 1.0)) {
            snippet.delete();
        }

        total_size += snippet.size();
        snippets.push(snippet);

        if (i + 1) % 1000 == 0 {
            println!("  Generated {}/{} snippets...", i + 1, args.count);
        }
    }

    persistence::save(&args.output, &snippets)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    let file_size = std::fs::metadata(&args.output)
        .map(|m| m.len())
        .unwrap_or(0);
    println!();
    println!("Library created: {}", args.output.display());
    println!("  Snippets: {}", args.count);
    println!("  Payload size: {:.2} MB", total_size as f64 / 1024.0 / 1024.0);
    println!("  File size: {:.2} MB", file_size as f64 / 1024.0 / 1024.0);
    Ok(())
}
