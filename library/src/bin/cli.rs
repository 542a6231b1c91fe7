use scene_pipeline::LibraryError;
use scene_pipeline::run;

fn main() -> Result<(), LibraryError> {
    env_logger::init();
    run(std::env::args().collect())
}
