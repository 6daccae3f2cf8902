use camino::Utf8PathBuf;

pub const DEFAULT_LOG_DIRECTIVES: &str = "peerpipe=info,peerpipe_=info";

pub const PROMPT: &str = "Enter file path > ";

pub fn default_output_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(".")
}
