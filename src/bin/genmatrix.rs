//! Matrix data generator: emits a random sparse `A`, dense `B`, `x0`, `u`
//! JSON document sized for the engine's Q1.31 data loader. Grounded in
//! `original_source/scripts/generate_sparse_matrix.py`.

#![forbid(unsafe_code)]

use clap::Parser;
use rand::Rng;
use serde::Serialize;

/// Generate a random sparse system-matrix document.
#[derive(Parser, Debug)]
struct Args {
    /// State dimension (A is n x n, B is n x 1).
    #[arg(default_value_t = 8)]
    n: usize,

    /// Fraction of A's entries that are nonzero, in `(0, 1]`.
    #[arg(default_value_t = 0.2)]
    density: f64,

    /// Output path; defaults to `sparse_matrix_{n}_{density}.json`.
    #[arg(long)]
    out: Option<String>,
}

#[derive(Serialize)]
struct MatrixDoc {
    #[serde(rename = "A")]
    a: Vec<Vec<f64>>,
    #[serde(rename = "B")]
    b: Vec<Vec<f64>>,
    x0: Vec<f64>,
    u: Vec<f64>,
    scale_bits: u32,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut rng = rand::thread_rng();

    let a: Vec<Vec<f64>> = (0..args.n)
        .map(|_| {
            (0..args.n)
                .map(|_| {
                    let v: f64 = rng.gen();
                    if v > args.density {
                        0.0
                    } else {
                        rng.gen_range(0.0..1.0)
                    }
                })
                .collect()
        })
        .collect();
    let b: Vec<Vec<f64>> = (0..args.n).map(|_| vec![rng.gen::<f64>() * 0.1 - 0.05]).collect();
    let x0: Vec<f64> = (0..args.n).map(|_| rng.gen::<f64>() * 0.1 - 0.05).collect();
    let u = vec![0.0];

    let doc = MatrixDoc { a, b, x0, u, scale_bits: 31 };
    let out_path = args
        .out
        .unwrap_or_else(|| format!("sparse_matrix_{}_{}.json", args.n, args.density));

    let json = serde_json::to_string_pretty(&doc)?;
    std::fs::write(&out_path, json)?;
    println!("Saved {out_path}");
    Ok(())
}
