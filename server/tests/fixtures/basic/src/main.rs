use basic_fixture::{greet, types::Config};

fn main() {
    let config = Config::default();
    println!("{}", greet(&config.name));
}
