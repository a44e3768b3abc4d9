mod common;
use common::rand_u;
use gentext::{Generator, Program};

fn main() {
    // Assignments where a value may only use the variable defined just before
    // it. A name that is a keyword fails its check and the choice falls back
    // to a numbered name.
    let program: Program = r#"
        program   = {n = 0} statement*[1...6] ;
        statement = "let " ident " = " value ";" comment? "\n" {prev = id} {n = n + 1} ;
        ident     = letter*[2...3]{capture id} {? id != "if" && id != "in" && id != "let"}
                  | ("v" {= n}){capture id} ;
        letter    = "i" | "f" | "n" | "l" | "e" | "t" ;
        value     = [50%] 0...1000 | var | value " + " value ;
        var       = {? n > 0} {= prev} ;
        comment   = " // " letter*[4]{capture! c} {= upcase(c)} ;
    "#
    .parse()
    .unwrap();
    print!("{}", program);

    let mut buf = [0; 1024];
    let mut u = rand_u(&mut buf);
    let mut generator = Generator::new(&program);
    match generator.expression::<String>(&mut u).unwrap() {
        Some(text) => print!("{}", text),
        None => println!("generation failed"),
    }

    // start from a rule other than the first
    let mut generator = Generator::new(&program).start("letter").unwrap();
    let letter: String = generator.expression(&mut u).unwrap().unwrap();
    println!("a single letter: {}", letter);
}
