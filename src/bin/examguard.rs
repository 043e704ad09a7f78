use anyhow::Result;

fn main() -> Result<()> {
    examguard::cli::run()
}
