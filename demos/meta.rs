mod common;
use common::rand_u;
use gentext::{Generator, Program};

fn main() {
    // a grammar that produces random grammars
    let program: Program = r#"
        grammar = {i = 0} rule+ ;
        rule    = "r" {= i} {i = i + 1} " = " alts " ;\n" ;
        alts    = weight? concat (" | " weight? concat)*[0...3] ;
        weight  = "[" 1...30 "%] " ;
        concat  = repeat (" " repeat)*[0...3] ;
        repeat  = term | term "?" | "(" term ")" ("*" | "+") | term "*[" 0...2 "..." 3...5 "]" ;
        term    = "\"" ("a" | "b" | "c")*[1...4] "\"" | 0...9 "..." 10...99 ;
    "#
    .parse()
    .unwrap();

    let mut buf = [0; 4096];
    let mut u = rand_u(&mut buf);
    let grammar: String = Generator::new(&program)
        .expression(&mut u)
        .unwrap()
        .unwrap();
    println!("Grammar:\n{}", grammar);

    let generated: Program = match grammar.parse() {
        Ok(p) => p,
        Err(e) => {
            // e.g. more than 100% in one choice
            println!("does not compile: {}", e);
            return;
        }
    };
    println!("Generated sentences:");
    let mut generator = Generator::new(&generated);
    for _ in 0..10 {
        let sentence: String = generator.expression(&mut u).unwrap().unwrap();
        println!("{}", sentence);
    }
}
