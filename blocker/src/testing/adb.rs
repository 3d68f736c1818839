use std::io;

use mockall::mock;
use rstest::fixture;

use crate::command::CmdOutput;

mock! {
    pub Adb {

    }

    impl crate::adb::Adb for Adb {
        fn get_connected_devices(&self) -> crate::Result<Vec<String>>;
        fn forward_generic(&self, local: &str, remote: &str) -> io::Result<CmdOutput>;
        fn pull(&self, device: &str, local: &str) -> io::Result<CmdOutput>;
        fn push(&self, local: &str, device: &str) -> io::Result<CmdOutput>;
        fn shell(&self, shell_cmd: &str) -> io::Result<CmdOutput>;
    }
}

#[fixture]
pub fn mock_adb() -> MockAdb {
    MockAdb::new()
}
