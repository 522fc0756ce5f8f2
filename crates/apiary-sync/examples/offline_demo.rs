//! 离线回退演示
//!
//! 先在线查询一次蜂箱（响应被回写到本地缓存），再切断网络重复同一查询，
//! 结果由本地解析器从缓存重新组装。

use apiary_sync::sync::FnExchange;
use apiary_sync::{
    apiary, Exchange, Operation, OperationError, OperationResult, SyncConfig, SyncEvent,
    SyncExchange,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const HIVE_QUERY: &str = r#"
    query hive($id: ID!) {
        hive(id: $id) {
            id
            name
            boxes { id position color frames { id position } }
            family { id race }
        }
    }
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("\n🚀 离线优先同步演示\n");
    println!("====================================\n");

    let data_dir = std::env::temp_dir().join("apiary_sync_demo");
    let config = SyncConfig::builder().data_dir(&data_dir).build();

    println!("📦 正在初始化同步层...");
    let ctx = apiary::bootstrap(config).await?;
    println!(
        "✅ 初始化完成: {} 张表, layout version={}\n",
        ctx.layout.len(),
        ctx.provision_report.version
    );

    let mut events = ctx.events.subscribe();

    // 模拟网络边界
    let online = Arc::new(AtomicBool::new(true));
    let network = {
        let online = online.clone();
        FnExchange::new(move |operation: Operation| {
            let online = online.clone();
            async move {
                if !online.load(Ordering::SeqCst) {
                    return OperationResult::failed(
                        operation,
                        OperationError::network("Failed to fetch"),
                    );
                }
                OperationResult::ok(
                    operation,
                    json!({
                        "hive": {
                            "id": 1,
                            "name": "Carnica #1",
                            "boxes": [
                                {"id": 11, "position": 0, "color": "#ffc848", "frames": [{"id": 101, "position": 0}]},
                                {"id": 12, "position": 1, "color": "#ffc848", "frames": []}
                            ],
                            "family": {"id": 7, "race": "carnica"}
                        }
                    }),
                )
            }
        })
    };

    let exchange = SyncExchange::new(Arc::new(ctx), Arc::new(network));
    let op = Operation::query(HIVE_QUERY)
        .with_operation_name("hive")
        .with_variables(json!({"id": 1}));

    println!("【在线查询】");
    let result = exchange.execute(op.clone()).await;
    println!("   来源: {:?}", result.operation.context.cache_outcome);
    println!("   数据: {}\n", serde_json::to_string_pretty(&result.data)?);

    println!("🔌 断开网络...\n");
    online.store(false, Ordering::SeqCst);

    println!("【离线查询】");
    let result = exchange.execute(op).await;
    println!("   来源: {:?}", result.operation.context.cache_outcome);
    println!("   原始错误: {:?}", result.original_error);
    println!("   数据: {}\n", serde_json::to_string_pretty(&result.data)?);

    println!("【事件】");
    while let Ok(event) = events.try_recv() {
        println!("   📡 {} @ {}", event.event_type(), event.timestamp());
        if let SyncEvent::WriteBackCompleted { written, failed, .. } = event {
            println!("      写入 {} 条, 失败 {} 条", written, failed);
        }
    }

    println!("\n====================================");
    println!("✅ 演示完成，缓存库位于 {}", data_dir.display());
    Ok(())
}
