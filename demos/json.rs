mod common;
use common::rand_u;
use gentext::{Bindings, EvalError, Evaluator, Generator, Program, Script, Value};

/// Adds `fresh(set, item)`, which is `true` if `item` is not in `set`, to the
/// built-in evaluator.
#[derive(Default)]
struct WithSets(Script);

impl Evaluator for WithSets {
    fn evaluate(&mut self, source: &str, bindings: &mut Bindings) -> Result<Value, EvalError> {
        let Some(args) = source.trim().strip_prefix("fresh(").and_then(|s| s.strip_suffix(')')) else {
            return self.0.evaluate(source, bindings);
        };
        let (set, item) = args
            .split_once(',')
            .ok_or_else(|| EvalError::new("fresh() takes 2 arguments"))?;
        let set = self.0.evaluate(set, bindings)?.to_string();
        let item = self.0.evaluate(item, bindings)?.to_string();
        Ok(Value::Bool(!set.contains(&format!("|{}|", item))))
    }
}

fn main() {
    // Object keys are unique across the document: `keys` holds every key
    // written so far, each followed by a `|`.
    let program: Program = r#"
        json     = {keys = "|"} object ;
        object   = "{" (member ("," member)*[0...4])? "}" ;
        member   = key ":" value ;
        key      = "\"" name{capture k} "\"" {? fresh(keys, k)} {keys = keys + k + "|"} ;
        name     = ("a" | "b" | "c" | "d")*[1...3] ;
        value    = [30%] object | list | string | number | "true" | "false" | "null" ;
        list     = "[" (value ("," value)*[0...3])? "]" ;
        string   = "\"" ("x" | "y" | "\\n" | U+E9)*[0...8] "\"" ;
        number   = -1000...1000 | -1.0...1.0 ;
    "#
    .parse()
    .unwrap();
    println!("{}", program);

    let mut buf = [0; 4096];
    let mut u = rand_u(&mut buf);
    let mut generator = Generator::new(&program).with_evaluator(WithSets::default());
    match generator.expression::<String>(&mut u).unwrap() {
        Some(text) => println!("{}", text),
        None => println!("no document satisfied the key checks"),
    }
}
