//! ビルド / プッシュの進捗通知

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;

/// バックエンドから届く進捗イベント
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stream: Option<String>,
    pub id: Option<String>,
    pub status: Option<String>,
    pub progress: Option<String>,
}

impl ProgressEvent {
    /// 表示用の1行（空のフィールドは省略）
    pub fn line(&self) -> String {
        let mut msg = String::new();
        if let Some(stream) = non_empty(&self.stream) {
            msg.push_str(stream);
        }
        if let Some(id) = non_empty(&self.id) {
            msg.push_str(id);
            msg.push_str(": ");
        }
        if let Some(status) = non_empty(&self.status) {
            msg.push_str(status);
            msg.push(' ');
        }
        if let Some(progress) = non_empty(&self.progress) {
            msg.push_str(progress);
        }
        msg
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// 進捗イベントの受け手
///
/// イベントはバックエンドが送出した順に届く。
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_event(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// 何もしない受け手
pub struct Silent;

impl ProgressObserver for Silent {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// 受け取った行を保持する受け手
#[derive(Default)]
pub struct RecordingObserver {
    lines: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_event(&self, event: &ProgressEvent) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(event.line());
        }
    }
}

/// スピナー付きのコンソール表示
pub struct BuildProgress {
    progress_bar: ProgressBar,
}

impl BuildProgress {
    pub fn new(image_name: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) =
            ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            pb.set_style(style);
        }
        pb.enable_steady_tick(std::time::Duration::from_millis(120));
        pb.set_message(format!("Building {}...", image_name));

        Self { progress_bar: pb }
    }

    pub fn finish_success(&self) {
        self.progress_bar.finish_with_message("Build completed ✓");
    }

    pub fn finish_error(&self, error: &str) {
        self.progress_bar
            .finish_with_message(format!("Build failed: {}", error));
    }
}

impl ProgressObserver for BuildProgress {
    fn on_event(&self, event: &ProgressEvent) {
        let line = event.line();
        let line = line.trim_end();
        if !line.is_empty() {
            // スピナーの上に1イベント1行で出力
            self.progress_bar.println(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_concatenates_present_fields() {
        let event = ProgressEvent {
            stream: None,
            id: Some("a1b2c3".to_string()),
            status: Some("Pushing".to_string()),
            progress: Some("[==>   ] 1MB/4MB".to_string()),
        };
        assert_eq!(event.line(), "a1b2c3: Pushing [==>   ] 1MB/4MB");
    }

    #[test]
    fn test_line_stream_only() {
        let event = ProgressEvent {
            stream: Some("Step 1/3 : FROM alpine\n".to_string()),
            id: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(event.line(), "Step 1/3 : FROM alpine\n");
    }

    #[test]
    fn test_closure_observer() {
        let seen = Mutex::new(Vec::new());
        let observer = |event: &ProgressEvent| seen.lock().unwrap().push(event.line());
        observer.on_event(&ProgressEvent {
            status: Some("Pulling".to_string()),
            ..Default::default()
        });
        assert_eq!(seen.lock().unwrap().as_slice(), ["Pulling "]);
    }

    #[test]
    fn test_recording_observer_keeps_order() {
        let observer = RecordingObserver::new();
        for step in ["one", "two", "three"] {
            observer.on_event(&ProgressEvent {
                stream: Some(step.to_string()),
                ..Default::default()
            });
        }
        assert_eq!(observer.lines(), vec!["one", "two", "three"]);
    }
}
