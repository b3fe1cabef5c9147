use clap::{Parser, ValueEnum};
use precond_kernels::factorization::{factorize, FactorAlgorithm, FactorizationParams};
use precond_kernels::stats::Stats;
use precond_kernels::threshold::{threshold_filter_approx, threshold_select};
use precond_kernels::{CsrMatrix, Executor, JacobiFactory, JacobiParams, LinOp};

/// Benchmark driver for the preconditioner kernels on a 2-D Poisson matrix
#[derive(Parser)]
#[command(name = "precond-bench", version)]
struct Cli {
    /// Grid points per side; the matrix has size² rows
    #[arg(long, default_value_t = 128)]
    size: usize,

    /// Largest block-Jacobi block
    #[arg(long, default_value_t = 8)]
    block_size: usize,

    /// Worker threads (0 = one per core)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Run every kernel on the single-worker reference executor
    #[arg(long)]
    reference: bool,

    /// Factorization to generate
    #[arg(long, value_enum, default_value_t = Algorithm::Cholesky)]
    algorithm: Algorithm,

    /// Print performance stats to stderr
    #[arg(long)]
    stats: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Algorithm {
    Cholesky,
    Lu,
}

/// Five-point Laplacian on a `side`×`side` grid.
fn poisson_2d(side: usize) -> CsrMatrix<f64> {
    let n = side * side;
    let mut triplets = Vec::with_capacity(5 * n);
    for y in 0..side {
        for x in 0..side {
            let row = y * side + x;
            triplets.push((row, row, 4.0));
            if x > 0 {
                triplets.push((row, row - 1, -1.0));
            }
            if x + 1 < side {
                triplets.push((row, row + 1, -1.0));
            }
            if y > 0 {
                triplets.push((row, row - side, -1.0));
            }
            if y + 1 < side {
                triplets.push((row, row + side, -1.0));
            }
        }
    }
    CsrMatrix::from_triplets(n, n, &triplets)
}

fn relative_residual(a: &CsrMatrix<f64>, x: &[f64], b: &[f64]) -> f64 {
    let ax = a.spmv(x);
    let num = ax.iter().zip(b).map(|(r, e)| (r - e).abs()).fold(0.0, f64::max);
    let den = b.iter().map(|v| v.abs()).fold(0.0, f64::max);
    num / den
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut stats = if cli.stats { Some(Stats::new()) } else { None };

    let exec = if cli.reference {
        Executor::reference()
    } else {
        Executor::parallel(cli.threads)
    }
    .unwrap_or_else(|e| {
        eprintln!("Executor error: {}", e);
        std::process::exit(1);
    });

    let a = poisson_2d(cli.size);
    if let Some(s) = stats.as_mut() {
        s.matrix_rows = a.nrows;
        s.matrix_nnz = a.nnz();
    }
    let b = vec![1.0; a.nrows];

    let rank = a.nnz() / 2;
    let timed = |stats: &mut Option<Stats>, name: &'static str, op: &mut dyn FnMut()| match stats {
        Some(s) => s.time(name, op),
        None => op(),
    };

    let mut threshold = 0.0;
    timed(&mut stats, "Threshold select", &mut || {
        threshold = threshold_select(&exec, &a, rank).unwrap_or_else(|e| {
            eprintln!("Selection error: {}", e);
            std::process::exit(1);
        });
    });
    let mut approx = (0, 0.0);
    timed(&mut stats, "Approx threshold filter", &mut || {
        let (filtered, t) = threshold_filter_approx(&exec, &a, rank).unwrap_or_else(|e| {
            eprintln!("Filter error: {}", e);
            std::process::exit(1);
        });
        approx = (filtered.nnz(), t);
    });
    println!(
        "threshold at rank {}: {} (approx {} keeping {} entries)",
        rank, threshold, approx.1, approx.0
    );

    let factory = JacobiFactory::new(
        exec.clone(),
        JacobiParams {
            max_block_size: cli.block_size,
            ..JacobiParams::default()
        },
    );
    let mut jacobi = None;
    timed(&mut stats, "Jacobi generate", &mut || {
        jacobi = Some(factory.generate(&a).unwrap_or_else(|e| {
            eprintln!("Jacobi error: {}", e);
            std::process::exit(1);
        }));
    });
    if let Some(jacobi) = jacobi {
        let mut x = Vec::new();
        timed(&mut stats, "Jacobi apply", &mut || {
            x = jacobi.apply(&b).unwrap_or_else(|e| {
                eprintln!("Jacobi apply error: {}", e);
                std::process::exit(1);
            });
        });
        println!(
            "block-Jacobi: {} blocks, {} bytes, one sweep residual {:.3e}",
            jacobi.num_blocks(),
            jacobi.storage_bytes(),
            relative_residual(&a, &x, &b)
        );
        if let Some(s) = stats.as_mut() {
            s.jacobi_blocks = jacobi.precision_histogram();
            s.jacobi_bytes = jacobi.storage_bytes();
            s.singular_blocks = jacobi.is_invertible().iter().filter(|&&ok| !ok).count();
        }
    }

    let params = FactorizationParams {
        algorithm: match cli.algorithm {
            Algorithm::Cholesky => FactorAlgorithm::Cholesky,
            Algorithm::Lu => FactorAlgorithm::Lu,
        },
        ..FactorizationParams::default()
    };
    let mut factor = None;
    timed(&mut stats, "Factorization generate", &mut || {
        factor = Some(factorize(&exec, &a, &params).unwrap_or_else(|e| {
            eprintln!("Factorization error: {}", e);
            std::process::exit(1);
        }));
    });
    if let Some(factor) = factor {
        let mut x = Vec::new();
        timed(&mut stats, "Triangular solves", &mut || {
            x = factor.apply(&b).unwrap_or_else(|e| {
                eprintln!("Solve error: {}", e);
                std::process::exit(1);
            });
        });
        let residual = relative_residual(&a, &x, &b);
        println!(
            "{:?}: {} factor nonzeros, {} failed pivots, residual {:.3e}",
            factor.algorithm(),
            factor.lower().nnz() + factor.upper().nnz(),
            factor.failed_rows().len(),
            residual
        );
        if let Some(s) = stats.as_mut() {
            s.factor_nnz = factor.lower().nnz() + factor.upper().nnz();
            s.failed_pivots = factor.failed_rows().len();
            s.residual = Some(residual);
        }
    }

    if let Some(ref stats) = stats {
        stats.display();
    }
}
