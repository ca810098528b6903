pub mod auto_invest;

pub use auto_invest::AutoInvestWorker;
