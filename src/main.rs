fn main() -> anyhow::Result<()> {
    mobisync::cli::run()
}
