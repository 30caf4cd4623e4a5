use colored::Colorize;
use imagesmith_build::{BuildConfig, DockerBackend};

/// Docker に接続する（失敗時は原因と対処法を表示）
pub async fn connect_with_error_handling(config: &BuildConfig) -> anyhow::Result<DockerBackend> {
    match DockerBackend::connect(config).await {
        Ok(backend) => Ok(backend),
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Docker接続エラー".red().bold());
            eprintln!();
            eprintln!("{}", "原因:".yellow());
            eprintln!("  {}", e);
            eprintln!();
            eprintln!("{}", "解決方法:".yellow());
            eprintln!("  • Dockerが起動しているか確認してください");
            match &config.docker_host {
                Some(host) => {
                    eprintln!("  • dockerHost ({}) に到達できるか確認してください", host);
                    if config.docker_cert_path.is_some() {
                        eprintln!(
                            "  • dockerCertPath に key.pem / cert.pem / ca.pem があるか確認してください"
                        );
                    }
                }
                None => {
                    eprintln!("  • docker ps コマンドが正常に動作するか確認してください");
                }
            }
            Err(anyhow::anyhow!("Docker接続に失敗しました"))
        }
    }
}
