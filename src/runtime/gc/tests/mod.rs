//! GC 单元测试
//!
//! 测试标记清除的可达性判断

use crate::runtime::gc::GC;
use crate::runtime::memory::{Closure, Heap, HeapValue, Table};
use crate::runtime::value::Value;

#[cfg(test)]
mod gc_collect_tests {
    use super::*;

    #[test]
    fn test_unreachable_objects_are_freed() {
        let mut heap = Heap::new();
        let root = heap.allocate(HeapValue::Table(Table::new()));
        let garbage = heap.allocate(HeapValue::Table(Table::new()));

        let mut gc = GC::new();
        let stats = gc.collect(&mut heap, [root]);

        assert_eq!(stats.freed, 1);
        assert_eq!(stats.live, 1);
        assert!(heap.is_valid(root));
        assert!(!heap.is_valid(garbage));
        assert_eq!(gc.collections(), 1);
        assert_eq!(gc.freed_total(), 1);
    }

    #[test]
    fn test_reachable_through_closure_cells() {
        let mut heap = Heap::new();
        let payload = heap.allocate(HeapValue::Table(Table::new()));
        let cell = heap.allocate(HeapValue::Cell(Value::Table(payload)));
        let closure = heap.allocate(HeapValue::Closure(Closure {
            proto: 0,
            upvalues: vec![cell],
        }));
        let mut globals = Table::new();
        globals.set_str("f", Value::Function(closure));
        let root = heap.allocate(HeapValue::Table(globals));

        let stats = GC::new().collect(&mut heap, [root]);

        assert_eq!(stats.freed, 0);
        assert!(heap.is_valid(payload));
    }

    #[test]
    fn test_cycles_are_collected() {
        let mut heap = Heap::new();
        let a = heap.allocate(HeapValue::Table(Table::new()));
        let b = heap.allocate(HeapValue::Table(Table::new()));
        heap.table_mut(a).unwrap().set_str("b", Value::Table(b));
        heap.table_mut(b).unwrap().set_str("a", Value::Table(a));

        let stats = GC::new().collect(&mut heap, std::iter::empty());

        assert_eq!(stats.freed, 2);
        assert!(heap.is_empty());
    }
}
