//! `vm16c`: a small CLI that wires a hand-built [`Procedure`] through the
//! full vm16 pipeline (spec §6's "CLI (external, out of core)").
//!
//! There is no lexer/parser in this workspace (front-end collaborators are
//! explicitly out of scope for the core), so this binary's only input is
//! one of a handful of built-in demo procedures, each chosen to exercise
//! one of spec §8's end-to-end scenarios. Flag shape follows the teacher's
//! own CLI conventions (`clap`, `env_logger`, `-o FILE`).

use clap::{App, Arg};
use log::info;
use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::process;

use vm16_asm::{GlobalReloc, Linker, Object};
use vm16_codegen::dominator_tree;
use vm16_codegen::flowgraph::build_cfg;
use vm16_codegen::ir::{Assembler, Operand, Procedure, VarId};
use vm16_codegen::isa::NUM_COLORS;
use vm16_codegen::{lower, peephole, regalloc, ssa};

fn var(base: u32) -> Operand {
    Operand::Var(VarId::from_base(base))
}

/// Scenario 1: `int f(int a, int b) { return a + b; }`.
fn demo_sum() -> Procedure {
    let mut proc = Procedure::new("sum");
    proc.set_exported();
    proc.push_parameter(VarId::from_base(0));
    proc.push_parameter(VarId::from_base(1));

    let mut asm = Assembler::new();
    asm.emit_assign_add(var(2), var(0), var(1));
    asm.emit_ret(var(2));
    proc.extend_body(asm.finish());
    proc
}

/// Scenario 2: `int fib(int n) { if (n == 1) return 1; return n + fib(n-1); }`.
fn demo_fib() -> Procedure {
    let mut proc = Procedure::new("fib");
    proc.set_exported();
    proc.push_parameter(VarId::from_base(0));

    let mut asm = Assembler::new();
    asm.emit_cmp(var(0), Operand::Const(1));
    let ret_one = asm.make_label();
    asm.emit_je(Operand::Label(ret_one));
    asm.emit_assign_sub(var(1), var(0), Operand::Const(1));
    let call = asm.emit_assign_call(var(2), Operand::Name("fib".to_string()));
    asm.push_extra_at(call, var(1));
    asm.emit_assign_add(var(3), var(0), var(2));
    asm.emit_ret(var(3));
    asm.mark_label(ret_one);
    asm.emit_ret(Operand::Const(1));
    asm.fix_labels();
    proc.extend_body(asm.finish());
    proc
}

/// Scenario 4: `int f(int i, int n) { while (i < n) { i = i + 1; } return i; }`.
fn demo_loop() -> Procedure {
    let mut proc = Procedure::new("count_to");
    proc.set_exported();
    proc.push_parameter(VarId::from_base(0));
    proc.push_parameter(VarId::from_base(1));

    let mut asm = Assembler::new();
    let header = asm.make_and_mark_label();
    asm.emit_cmp(var(0), var(1));
    let body = asm.make_label();
    asm.emit_jl(Operand::Label(body));
    let exit = asm.make_label();
    asm.emit_jmp(Operand::Label(exit));
    asm.mark_label(body);
    asm.emit_assign_add(var(0), var(0), Operand::Const(1));
    asm.emit_jmp(Operand::Label(header));
    asm.mark_label(exit);
    asm.emit_ret(var(0));
    asm.fix_labels();
    proc.extend_body(asm.finish());
    proc
}

/// Scenario 3: twelve variables defined before any of them is consumed, so
/// every pair is simultaneously live right after the last definition.
fn demo_spill() -> Procedure {
    let mut proc = Procedure::new("spill_stress");
    proc.set_exported();

    let mut asm = Assembler::new();
    for i in 0..12u32 {
        asm.emit_assign(var(i), Operand::Const(i64::from(i)));
    }
    asm.emit_assign(var(100), var(0));
    for i in 1..12u32 {
        asm.emit_assign_add(var(100), var(100), var(i));
    }
    asm.emit_ret(var(100));
    proc.extend_body(asm.finish());
    proc
}

fn build_demo(name: &str) -> Procedure {
    match name {
        "sum" => demo_sum(),
        "fib" => demo_fib(),
        "loop" => demo_loop(),
        "spill" => demo_spill(),
        other => {
            eprintln!("vm16c: unknown demo `{}`", other);
            process::exit(2);
        }
    }
}

/// Runs one procedure through CFG construction, dominance, SSA
/// construction, register allocation, lowering and peephole optimization,
/// returning the final assembly text.
fn compile(proc: &Procedure, k: u32) -> String {
    let mut cfg = build_cfg(proc.body());
    let dom = dominator_tree::analyze(&cfg);
    let parameters: Vec<u32> = proc.parameters().iter().map(|p| p.base()).collect();
    ssa::construct(&mut cfg, &dom, &parameters);
    let colors = regalloc::allocate(&mut cfg, k, &dom)
        .unwrap_or_else(|e| panic!("register allocation failed for `{}`: {}", proc.name(), e));
    let asm = lower::lower(&cfg, proc, &colors);
    peephole::optimize(&asm)
}

/// Scenario 6: builds two toy objects by hand (no assembler/parser in
/// this workspace to produce them from text) and links them, exercising
/// cross-object global relocation and offset rebasing.
fn demo_link() -> Result<Vec<u8>, vm16_asm::LinkErrors> {
    let mut a_globals = HashMap::new();
    a_globals.insert("a_entry".to_string(), 0);
    let a = Object::new(vec![0, 0, 0], vec![GlobalReloc::new("b_entry", 1)], vec![2], a_globals);

    let mut b_globals = HashMap::new();
    b_globals.insert("b_entry".to_string(), 0);
    let b = Object::new(vec![0, 0], vec![GlobalReloc::new("a_entry", 1)], Vec::new(), b_globals);

    let mut linker = Linker::new();
    linker.append_object(&a);
    linker.append_object(&b);
    linker.link()
}

fn write_output(output: &str, text: &str) {
    match output {
        "-" => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            let _ = writeln!(handle, "{}", text);
        }
        path => {
            fs::write(path, text).unwrap_or_else(|e| {
                eprintln!("vm16c: could not write `{}`: {}", path, e);
                process::exit(1);
            });
        }
    }
}

fn main() {
    env_logger::init();

    let matches = App::new("vm16c")
        .version(vm16_codegen::VERSION)
        .about("vm16 codegen/linker pipeline driver")
        .arg(
            Arg::with_name("demo")
                .long("demo")
                .takes_value(true)
                .possible_values(&["sum", "fib", "loop", "spill", "link"])
                .default_value("sum")
                .help("which built-in procedure to run through the pipeline"),
        )
        .arg(
            Arg::with_name("k")
                .long("k")
                .takes_value(true)
                .help("register budget K passed to the allocator (default: the target's full bank)"),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .default_value("-")
                .help("output file, or `-` for stdout"),
        )
        .get_matches();

    let demo = matches.value_of("demo").unwrap();

    if demo == "link" {
        match demo_link() {
            Ok(bytes) => {
                info!("link succeeded: {} bytes", bytes.len());
                let text: Vec<String> = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                write_output(matches.value_of("output").unwrap(), &text.join(" "));
            }
            Err(errors) => {
                eprintln!("{}", errors);
                process::exit(1);
            }
        }
        return;
    }

    let k: u32 = match matches.value_of("k") {
        Some(s) => s.parse().unwrap_or_else(|_| {
            eprintln!("vm16c: --k must be a non-negative integer");
            process::exit(2);
        }),
        None => NUM_COLORS,
    };

    let proc = build_demo(demo);
    info!("compiling `{}` with K={}", proc.name(), k);
    let asm = compile(&proc, k);
    write_output(matches.value_of("output").unwrap(), &asm);
}
