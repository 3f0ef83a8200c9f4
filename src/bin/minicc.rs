//! The compiler driver. Reads a single C source file, runs the preprocessor,
//! feeds the result through every stage in `minic`, and either stops early to
//! print an intermediate form (the `--print*`/stop-stage flags) or hands the
//! emitted assembly to the system assembler/linker.
//!
//! Run with `--help` for the full flag list.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

use clap::Parser;

use minic::back::{emit, legalize, pseudo, select};
use minic::front::{lex, lower, parse};
use minic::sema;

/// A small C compiler: preprocesses, compiles to x86-64 assembly, then
/// assembles and links with the system toolchain.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input C source file
    file: PathBuf,

    /// stop after lexing (implies --printTokens is the only way to see output)
    #[arg(long)]
    lex: bool,
    /// dump the token stream to stdout and stop
    #[arg(long = "printTokens")]
    print_tokens: bool,

    /// stop after parsing
    #[arg(long)]
    parse: bool,
    /// dump the parsed AST to stdout and stop
    #[arg(long = "printAst")]
    print_ast: bool,

    /// stop after the semantic passes
    #[arg(long)]
    validate: bool,
    /// dump the AST after semantic analysis and stop
    #[arg(long = "printAstAfter")]
    print_ast_after: bool,

    /// stop after instruction selection
    #[arg(long)]
    codegen: bool,
    /// dump the pseudo-assembly before legalization and stop
    #[arg(long = "printAsm")]
    print_asm: bool,
    /// dump the assembly after legalization and stop
    #[arg(long = "printAsmAfter")]
    print_asm_after: bool,

    /// write the `.s` file and stop, without assembling or linking
    #[arg(long)]
    assemble: bool,

    /// assemble to a `.o` file instead of linking an executable
    #[arg(short = 'c')]
    compile_only: bool,

    /// link against library `name` (repeatable), e.g. `-lm`
    #[arg(short = 'l', value_name = "name")]
    libs: Vec<String>,

    /// the preprocessor/assembler/linker to shell out to
    #[arg(long, default_value = "gcc")]
    cc: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let preprocessed = match preprocess(&args.cc, &args.file) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("minicc: {e}");
            return ExitCode::FAILURE;
        }
    };

    if args.lex || args.print_tokens {
        let (tokens, errors) = lex::Lexer::new(&preprocessed).tokenize();
        if args.print_tokens {
            for tok in &tokens {
                println!("{tok}");
            }
        }
        if !errors.is_empty() {
            for e in &errors {
                eprintln!("{e}");
            }
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    let (mut program, parse_errors) = parse::parse(&preprocessed);
    if !parse_errors.is_empty() {
        for e in &parse_errors {
            eprintln!("{e}");
        }
        return ExitCode::FAILURE;
    }

    if args.parse || args.print_ast {
        if args.print_ast {
            println!("{program:#?}");
        }
        return ExitCode::SUCCESS;
    }

    let analysis = match sema::validate(&mut program) {
        Ok(analysis) => analysis,
        Err(diags) => {
            for line in diags.render_all(&preprocessed) {
                eprintln!("{line}");
            }
            return ExitCode::FAILURE;
        }
    };

    if args.validate || args.print_ast_after {
        if args.print_ast_after {
            println!("{program:#?}");
        }
        return ExitCode::SUCCESS;
    }

    let tir = lower::lower(&program, &analysis);
    let (mut asm_program, aggregate_sizes) = select::select(&tir, &analysis.symbols);

    if args.codegen || args.print_asm {
        if args.print_asm {
            println!("{asm_program:#?}");
        }
        return ExitCode::SUCCESS;
    }

    pseudo::replace(&mut asm_program, &aggregate_sizes);
    legalize::legalize(&mut asm_program);

    if args.print_asm_after {
        println!("{asm_program:#?}");
        return ExitCode::SUCCESS;
    }

    let asm_text = emit::emit(&asm_program);
    let asm_path = args.file.with_extension("s");
    if let Err(e) = std::fs::write(&asm_path, &asm_text) {
        eprintln!("minicc: could not write {}: {e}", asm_path.display());
        return ExitCode::FAILURE;
    }

    if args.assemble {
        return ExitCode::SUCCESS;
    }

    if args.compile_only {
        let obj_path = args.file.with_extension("o");
        return run_cc(&args.cc, &["-c"], &asm_path, &obj_path, &[]);
    }

    let exe_path = args.file.with_extension("");
    run_cc(&args.cc, &[], &asm_path, &exe_path, &args.libs)
}

/// Runs `cc -E -P` on `file`, returning the preprocessed source text. The
/// preprocessor is an external collaborator: this compiler never implements
/// macro expansion or `#include` itself.
fn preprocess(cc: &str, file: &Path) -> Result<String, String> {
    let output = Command::new(cc)
        .args(["-E", "-P"])
        .arg(file)
        .output()
        .map_err(|e| format!("could not run `{cc}`: {e}"))?;
    if !output.status.success() {
        return Err(format!(
            "preprocessing {} failed:\n{}",
            file.display(),
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    String::from_utf8(output.stdout).map_err(|e| format!("preprocessor output was not UTF-8: {e}"))
}

/// Invokes the system assembler/linker on the emitted `.s` file.
/// `extra_flags` carries `-c` when assembling to an object file only;
/// `libs` carries any `-l<name>` link libraries.
fn run_cc(cc: &str, extra_flags: &[&str], asm_path: &Path, out_path: &Path, libs: &[String]) -> ExitCode {
    let mut cmd = Command::new(cc);
    cmd.args(extra_flags).arg(asm_path).arg("-o").arg(out_path);
    for lib in libs {
        cmd.arg(format!("-l{lib}"));
    }
    match cmd.status() {
        Ok(status) if status.success() => ExitCode::SUCCESS,
        Ok(status) => ExitCode::from(status.code().unwrap_or(1) as u8),
        Err(e) => {
            eprintln!("minicc: could not run `{cc}`: {e}");
            ExitCode::FAILURE
        }
    }
}
