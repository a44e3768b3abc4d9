mod common;
use common::rand_u;
use gentext::{Generator, Program};

fn main() {
    // A divisor is checked right after it is written; a zero sends the
    // enclosing `expr` back to try another alternative.
    let program: Program = r#"
        expr   = [40%] num | paren | expr " " symbol " " expr | div ;
        paren  = "(" expr ")" ;
        div    = expr " / " num{capture d} {? int(d) != 0} ;
        symbol = "-" | "+" | "*" ;
        num    = 0...99 ;
    "#
    .parse()
    .unwrap();

    let mut buf = [0; 4096];
    let mut u = rand_u(&mut buf);
    let mut generator = Generator::new(&program);
    for _ in 0..5 {
        if let Some(sentence) = generator.expression::<String>(&mut u).unwrap() {
            println!("{}", sentence);
        }
    }

    // Similar, but sometimes includes an extra closing parenthesis and/or
    // a symbol that is not an operator.
    let program: Program = r#"
        expr   = num | paren | expr symbol expr ;
        paren  = "(" expr symbol expr ")" ")"? ;
        symbol = [90%] ("-" | "+" | "*" | "÷") | "%" | "^" | U+2212 ;
        num    = 0...9*[1...4] ;
    "#
    .parse()
    .unwrap();

    let mut buf = [0; 4096];
    let mut u = rand_u(&mut buf);
    let sentence: String = Generator::new(&program)
        .expression(&mut u)
        .unwrap()
        .unwrap();
    println!("{}", sentence);
}
