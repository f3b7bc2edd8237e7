/// Bar colors used to tell the stages of a file apart
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BarColor {
    /// Unpacking
    #[default]
    CYAN,
    /// Writing the event dump
    MAGENTA,
    /// The file failed
    RED,
    /// The file is done
    GREEN,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    /// Index of the file in the configured input list
    pub file_index: usize,
    pub worker_id: usize,
    pub color: BarColor,
}

impl WorkerStatus {
    pub fn new(progress: f32, file_index: usize, worker_id: usize, color: BarColor) -> Self {
        Self {
            progress,
            file_index,
            worker_id,
            color,
        }
    }
}
