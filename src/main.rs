use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    passerelle::cli::main()
}
