use utoipa::{OpenApi, openapi::OpenApi as OpenApiSpec};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        orders::{OrderList, OrderWithItems, PlaceOrderRequest, UpdateOrderStatusRequest},
        payments::{
            GatewayList, InitiatePaymentRequest, PaymentInitiated, PaymentRefunded,
            PaymentVerified, RefundPaymentRequest, VerifyPaymentRequest,
        },
        products::{CreateProductRequest, ProductList, RestockRequest, UpdateProductRequest},
    },
    gateway::{GatewayOption, InitiateResponse, RefundResponse, VerifyResponse},
    models::{GatewayKind, Order, OrderItem, OrderStatus, Payment, PaymentStatus, Product},
    response::{ApiResponse, ErrorData, Meta},
    routes::{health, orders, params, payments, products},
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        products::list_products,
        products::create_product,
        products::list_low_stock,
        products::get_product,
        products::update_product,
        products::restock_product,
        products::delete_product,
        orders::place_order,
        orders::list_orders,
        orders::get_order,
        orders::update_order_status,
        orders::cancel_order,
        payments::list_gateways,
        payments::initiate_payment,
        payments::get_payment,
        payments::verify_payment,
        payments::refund_payment,
    ),
    components(
        schemas(
            Product,
            Order,
            OrderItem,
            Payment,
            OrderStatus,
            PaymentStatus,
            GatewayKind,
            GatewayOption,
            InitiateResponse,
            VerifyResponse,
            RefundResponse,
            CreateProductRequest,
            UpdateProductRequest,
            RestockRequest,
            ProductList,
            PlaceOrderRequest,
            UpdateOrderStatusRequest,
            OrderList,
            OrderWithItems,
            InitiatePaymentRequest,
            VerifyPaymentRequest,
            RefundPaymentRequest,
            PaymentInitiated,
            PaymentVerified,
            PaymentRefunded,
            GatewayList,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            params::LowStockQuery,
            Meta,
            ErrorData,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<Order>,
            ApiResponse<OrderList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<Payment>,
            ApiResponse<GatewayList>
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Products", description = "Product catalog and inventory endpoints"),
        (name = "Orders", description = "Order placement and lifecycle endpoints"),
        (name = "Payments", description = "Payment gateway endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
