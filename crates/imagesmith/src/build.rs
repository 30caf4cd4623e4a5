use crate::{BuildArgs, ConfigArgs, docker, utils};
use colored::Colorize;
use imagesmith_build::{
    BuildConfig, BuildOutcome, BuildProgress, ContextAssembler, DockerfileWriter, Pipeline,
    RunOutcome, resolve_image, skip_reason,
};

/// コマンドラインの指定を設定に反映
fn apply_overrides(config: &mut BuildConfig, args: &BuildArgs) {
    if args.push {
        config.push_image = true;
    }
    if args.push_tags {
        config.push_image_tag = true;
    }
    if args.skip_push {
        config.skip_docker_push = true;
    }
    if args.no_cache {
        config.no_cache = true;
    }
    if args.pull {
        config.pull_on_build = true;
    }
    if let Some(platform) = &args.platform {
        config.platform = Some(platform.clone());
    }
}

/// ビルドコマンドを処理
pub async fn handle_build_command(args: &BuildArgs) -> anyhow::Result<()> {
    let loaded = utils::load_config(&args.config)?;
    let mut config = loaded.config;
    apply_overrides(&mut config, args);

    println!("{}", "Dockerイメージをビルド中...".green());
    utils::print_loaded_config_file(&loaded.path);

    if let Some(reason) = skip_reason(&config) {
        println!("{} ビルドをスキップします: {}", "⚠".yellow(), reason);
        return Ok(());
    }

    if let Some(platform) = &config.platform {
        println!("プラットフォーム: {}", platform.cyan());
    }

    println!();
    println!("{}", "Dockerに接続中...".blue());
    let backend = docker::connect_with_error_handling(&config).await?;

    let progress = BuildProgress::new(&config.image_name);
    let pipeline = Pipeline::new(config, &loaded.project_dir, &backend).with_observer(&progress);

    match pipeline.run().await {
        Ok(RunOutcome::Built(outcome)) => {
            progress.finish_success();
            print_summary(&outcome);
            Ok(())
        }
        Ok(RunOutcome::Skipped { reason }) => {
            progress.finish_success();
            println!("{} ビルドをスキップしました: {}", "⚠".yellow(), reason);
            Ok(())
        }
        Err(e) => {
            progress.finish_error(&e.stage.to_string());
            eprintln!();
            eprintln!("{} {}", "✗".red().bold(), e.user_message());
            Err(e.into())
        }
    }
}

fn print_summary(outcome: &BuildOutcome) {
    println!();
    println!("{}", "✓ ビルドが完了しました".green().bold());
    println!("  Image: {}", outcome.image.cyan());
    println!("  ID:    {}", outcome.image_id);
    for tag in &outcome.tags {
        println!("  Tag:   {}", tag.cyan());
    }
    for pushed in &outcome.pushed_tags {
        println!("  {} {}", "↑".blue(), pushed.cyan());
    }
    if let Some(digest) = &outcome.digest {
        println!("  Digest: {}", digest.cyan());
    }
    println!(
        "  Image info: {}",
        outcome.provenance_path.display().to_string().cyan()
    );

    if !outcome.warnings.is_empty() {
        println!();
        for warning in &outcome.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }
}

/// 生成される Dockerfile を表示
///
/// リソースは一時ディレクトリに組み立てて ADD 命令のパスを求める。
pub async fn handle_dockerfile_command(args: &ConfigArgs) -> anyhow::Result<()> {
    let loaded = utils::load_config(args)?;
    let config = loaded.config;

    let resolved = resolve_image(&config, &loaded.project_dir).await?;

    if let Some(dir) = &config.docker_directory {
        let dockerfile = dir.join(imagesmith_build::dockerfile::DOCKERFILE_NAME);
        eprintln!(
            "{} dockerDirectory の Dockerfile を使用します: {}",
            "ℹ".blue(),
            dockerfile.display()
        );
        print!("{}", std::fs::read_to_string(&dockerfile)?);
        return Ok(());
    }

    let scratch = tempfile::tempdir()?;
    let copied = ContextAssembler::new(scratch.path())
        .strict_paths(config.strict_paths)
        .assemble(&config.resources)?;

    let effective = BuildConfig {
        base_image: resolved.base_image.clone(),
        ..config
    };
    let manifest = DockerfileWriter::new(&effective, scratch.path()).generate(&copied);

    for warning in resolved.warnings.iter().chain(&manifest.warnings) {
        eprintln!("{} {}", "⚠".yellow(), warning);
    }
    print!("{}", manifest.render());
    Ok(())
}
