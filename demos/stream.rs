mod common;
use common::rand_u;
use gentext::{Generator, Limited, Program, RunErrorKind};
use std::io;

fn main() {
    let mut buf = [0; 4096];
    let mut u = rand_u(&mut buf);

    // no choices or checks: written straight to stdout
    let straight: Program = r#"line = "row " 1...9 ": " ("ab" 0...9)*[3] "\n" ;"#
        .parse()
        .unwrap();
    println!("may restore output: {}", straight.may_restore_output());
    Generator::new(&straight)
        .generate_to(io::stdout().lock(), &mut u)
        .unwrap();

    // choices: buffered until the run succeeds
    let branching: Program = r#"line = ("yes" | "no" | "maybe")+ "\n" ;"#.parse().unwrap();
    println!("may restore output: {}", branching.may_restore_output());
    Generator::new(&branching)
        .generate_to(io::stdout().lock(), &mut u)
        .unwrap();

    // a grammar without a bound on its output
    let runaway: Program = r#"r = "x" r ;"#.parse().unwrap();
    let mut out = Limited::new(String::new(), 64);
    let e = Generator::new(&runaway)
        .generate(&mut out, &mut u)
        .unwrap_err();
    assert_eq!(e.kind(), RunErrorKind::Sink);
    println!("{} after {:?}", e, out.into_inner());
}
