#![allow(non_snake_case)]
use RustedDAE::Examples::dae_examples::dae_examples;

fn main() {
    let example = 0;
    dae_examples(example);
}
